use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::error::BillingResult;
use crate::models::BillingMonth;
use crate::services::billing_cycle::run_monthly_billing;
use crate::state::AppState;

const TICK: Duration = Duration::from_secs(30);

/// When the monthly run fires, in business-local time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingSchedule {
    pub timezone: Tz,
    pub run_day: u32,
    pub run_hour: u32,
    pub run_minute: u32,
}

impl BillingSchedule {
    pub fn from_config(config: &AppConfig) -> BillingResult<Self> {
        Ok(Self {
            timezone: config.billing_tz()?,
            run_day: config.billing_run_day,
            run_hour: config.billing_run_hour,
            run_minute: config.billing_run_minute,
        })
    }

    /// The month that should be billed at `now`, if any.
    ///
    /// Once the run time of the current local month has passed, the previous
    /// month is due until it has been recorded in `last_billed`.
    pub fn due_billing_month(
        &self,
        now: DateTime<Utc>,
        last_billed: Option<BillingMonth>,
    ) -> Option<BillingMonth> {
        let local = now.with_timezone(&self.timezone);
        let reached = (local.day(), local.hour(), local.minute())
            >= (self.run_day, self.run_hour, self.run_minute);
        if !reached {
            return None;
        }

        let target = BillingMonth::containing(local.date_naive()).previous();
        match last_billed {
            Some(last) if last >= target => None,
            _ => Some(target),
        }
    }
}

/// Background loop that triggers the monthly billing run.
///
/// Each run is spawned in its own task so a failure never stops the loop.
pub async fn run_billing_scheduler(state: AppState) {
    let schedule = match BillingSchedule::from_config(&state.config) {
        Ok(schedule) => schedule,
        Err(error) => {
            tracing::error!(error = %error, "Billing scheduler disabled: invalid schedule");
            return;
        }
    };
    tracing::info!(
        timezone = %schedule.timezone,
        day = schedule.run_day,
        hour = schedule.run_hour,
        minute = schedule.run_minute,
        "Billing scheduler started"
    );

    let mut last_billed: Option<BillingMonth> = None;
    loop {
        sleep(TICK).await;

        let Some(month) = schedule.due_billing_month(Utc::now(), last_billed) else {
            continue;
        };
        last_billed = Some(month);

        let service = state.bills.clone();
        let include_fee = state.config.billing_batch_processing_fee;
        tokio::spawn(async move {
            tracing::info!(%month, "Scheduler: running monthly billing");
            match run_monthly_billing(&service, month, include_fee).await {
                Ok(result) => tracing::info!(
                    %month,
                    created = result.created,
                    skipped = result.skipped,
                    failed = result.failed,
                    "Scheduler: monthly billing completed"
                ),
                Err(error) => {
                    tracing::error!(%month, error = %error, "Scheduler: monthly billing aborted")
                }
            }
        });
    }
}

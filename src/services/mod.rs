pub mod billing_cycle;
pub mod bills;
pub mod charges;
pub mod dispatch;
pub mod invoice;
pub mod notifications;
pub mod occupancy;
pub mod scheduler;
pub mod tenancy;

pub(crate) mod attendance;
pub(crate) mod bookings;
pub(crate) mod cron;
pub(crate) mod disputes;
pub(crate) mod notifications;

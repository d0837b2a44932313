pub(crate) mod attendance;
pub(crate) mod booking;
pub(crate) mod credit;
pub(crate) mod dispute;
pub(crate) mod notification;

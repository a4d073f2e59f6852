pub mod decision;
pub mod request;
pub mod threat;

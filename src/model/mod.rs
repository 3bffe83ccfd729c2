pub mod api;
pub mod archive;
pub mod audit;
pub mod candidate;
pub mod election;
pub mod mongodb;
pub mod session;
pub mod setting;
pub mod user;
pub mod vote;

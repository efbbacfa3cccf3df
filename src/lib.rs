pub mod analyzers;
pub mod config;
pub mod fetch;
pub mod health;
pub mod model;
pub mod output;
pub mod parser;
pub mod poller;
pub mod registry;
pub mod routes;
pub mod schedule;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

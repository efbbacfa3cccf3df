//! Route delay aggregation and chart queries.
//!
//! Snapshot reports are grouped into per-route samples, stored, and later
//! folded into fixed-width time buckets that can be printed or uploaded
//! as JSON to S3.

pub mod aggregate;
pub mod buckets;
pub mod types;
pub mod utility;
pub mod writetos3;

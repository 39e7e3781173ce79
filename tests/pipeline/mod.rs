//! End-to-end flows through the bus workers

mod flow_tests;
mod realtime_tests;

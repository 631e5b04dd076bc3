pub mod commands;
pub mod connection;
pub mod measurement;
pub mod modbus;
pub mod motor;
pub mod output;
pub mod registry;
pub mod rtu;
pub mod schedule;

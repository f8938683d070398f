//! nagare: a streaming tool-calling conversation loop.
//!
//! The engine lives in [`agent`], built on the message model
//! ([`message`], [`conversation`]), the stream [`accumulator`] and the
//! [`activity`] tree. [`provider`] and [`tools`] hold the collaborators the
//! loop is wired to, and [`cli`] / [`chat`] are the terminal front end used
//! by the `nagare` binary.

pub mod accumulator;
pub mod activity;
pub mod agent;
pub mod chat;
pub mod cli;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod format;
pub mod message;
pub mod output;
pub mod provider;
pub mod tools;

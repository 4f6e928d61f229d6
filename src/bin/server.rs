//! Support chat server binary.
//! Run with: cargo run --bin support-chat-server

use std::process::ExitCode;

use support_chat::start_support_chat;

fn main() -> ExitCode {
    start_support_chat::run()
}

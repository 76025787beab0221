use std::error::Error;
use std::sync::Arc;

use serde_json::Value;
use studio_sync::stream::client::{EventSink, SessionStreamClient};
use studio_sync::stream::proto::CompletePayload;

struct PrintSink;

impl EventSink for PrintSink {
    fn on_token(&self, text: &str) {
        print!("{text}");
    }

    fn on_action_trace(&self, data: &Value) {
        println!("\n[action] {data}");
    }

    fn on_complete(&self, done: &CompletePayload) {
        println!("\n[done] message {} in {}ms", done.message_id, done.duration_ms);
    }

    fn on_error(&self, message: &str) {
        eprintln!("\n[error] {message}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let base_url = "http://localhost:8080";
    let session_id = "REPLACE_WITH_SESSION_ID";

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut client = SessionStreamClient::new(base_url, Arc::new(PrintSink))?;
        client.send_message(session_id, "Summarize the current graph", vec![], None);
        client.finished().await;
        Ok(())
    })
}

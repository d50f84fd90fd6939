//! Crate-level integration and BDD tests.

use std::io::Cursor;

use serde_json::{Value, json};

use crate::{
    Command, CommandSpec, HandlerResult, LogLevel, OutRequest, PluginBuilder, PluginContext,
    RunOutcome,
};


fn greet(ctx: &mut PluginContext<'_, ()>, cmd: &Command, params: &Value) -> HandlerResult {
    ctx.notify_message(cmd, LogLevel::Info, "greeting");
    let request = OutRequest::<()>::new("getinfo", json!({})).on_success(|ctx, cmd, info| {
        let alias = info.get("alias").cloned().unwrap_or(Value::Null);
        ctx.success(cmd, json!({ "alias": alias }))
    });
    match params.get("name") {
        Some(name) => ctx.success(cmd, json!({ "hello": name })),
        None => ctx.send_request(cmd, request),
    }
}

fn lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|raw| serde_json::from_str(raw).expect("one JSON object per line"))
        .collect()
}

#[test]
fn end_to_end_conversation_over_byte_streams() {
    let mut plugin = PluginBuilder::new("greeter", ())
        .command(CommandSpec::new("greet", greet).usage("[name]"))
        .build()
        .expect("valid plugin");

    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"getmanifest","params":{}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"init","params":{"options":{},"configuration":{}}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":"a","method":"greet","params":{"name":"Bob"}}"#,
        "  ",
        r#"{"jsonrpc":"2.0","id":"b","method":"greet","params":{}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":1,"result":{"alias":"SILENTARTIST"}}"#,
        "\n",
    );
    let mut output = Vec::new();
    let outcome = plugin
        .run(Cursor::new(input.as_bytes()), &mut output)
        .expect("clean run");
    assert_eq!(outcome, RunOutcome::HostClosed);

    let replies: Vec<(Value, Value)> = lines(&output)
        .into_iter()
        .filter(|message| message.get("result").is_some())
        .map(|message| (message["id"].clone(), message["result"].clone()))
        .collect();
    assert_eq!(replies.len(), 4);
    assert_eq!(replies.get(2), Some(&(json!("a"), json!({"hello": "Bob"}))));
    assert_eq!(
        replies.get(3),
        Some(&(json!("b"), json!({"alias": "SILENTARTIST"})))
    );

    let notices = lines(&output)
        .into_iter()
        .filter(|message| message.get("method") == Some(&json!("message")))
        .count();
    assert_eq!(notices, 2);
}

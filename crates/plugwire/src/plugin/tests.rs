//! Unit tests for the builder and the dispatch loop.

use std::io::Cursor;

use mockall::Sequence;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::lifecycle::{Command, CommandResult};
use crate::options::{OptionKind, OptionValue};
use crate::outreq::OutRequest;
use crate::protocol::MockMessageSink;
use crate::protocol::codes;

type Log = Vec<String>;

fn echo(ctx: &mut PluginContext<'_, Log>, cmd: &Command, params: &Value) -> HandlerResult {
    ctx.success(cmd, params.clone())
}

fn legacy(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.success(cmd, json!("legacy"))
}

fn twice(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.success(cmd, json!(1))?;
    ctx.success(cmd, json!(2))
}

fn silent(_ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    Ok(CommandResult::finished(cmd.key()))
}

fn broken(_ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    Err(EngineError::handler(cmd.method(), "datastore unavailable"))
}

fn pair(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    for label in ["first", "second"] {
        let request = OutRequest::<Log>::new("getinfo", json!({ "label": label })).on_success(
            move |ctx, cmd, _reply| {
                ctx.state_mut().push(label.to_owned());
                if ctx.outstanding(cmd) > 0 {
                    return ctx.pending(cmd);
                }
                let order = ctx.state().clone();
                ctx.success(cmd, json!({ "order": order }))
            },
        );
        ctx.send_request(cmd, request)?;
    }
    ctx.pending(cmd)
}

fn quit(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.exit(cmd, 3)
}

fn remember(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    let topic = cmd.method().to_owned();
    ctx.state_mut().push(topic);
    ctx.notification_handled(cmd)
}

fn refuse(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.fail(cmd, RpcError::internal_error("not today"))
}

fn stage_continue(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    let name = ctx.plugin_name().to_owned();
    ctx.state_mut().push(format!("continue:{name}"));
    ctx.hook_continue(cmd)
}

fn stage_helper(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.state_mut().push("helper".into());
    ctx.hook_continue(cmd)
}

fn stage_reject(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.state_mut().push("reject".into());
    ctx.success(cmd, json!({ "result": "disconnect", "error": "go away" }))
}

fn init_reads_options(
    ctx: &mut PluginContext<'_, Log>,
    cmd: &Command,
    _params: &Value,
) -> HandlerResult {
    let somearg = ctx.options().string("somearg").unwrap_or("").to_owned();
    let network = ctx
        .configuration()
        .get("network")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    ctx.state_mut().push(format!("{somearg}@{network}"));
    ctx.init_complete(cmd)
}

fn init_disables(ctx: &mut PluginContext<'_, Log>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.disable(cmd, "Disabled via selfdisable option")
}

fn line(value: &Value) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(value).expect("serialisable");
    bytes.push(b'\n');
    bytes
}

fn send(plugin: &mut Plugin<Log>, value: &Value) -> Vec<OutgoingMessage> {
    let outcome = plugin.receive(&line(value)).expect("message handled");
    assert!(outcome.is_none(), "plugin should keep running");
    plugin.take_outgoing()
}

#[fixture]
fn plugin() -> Plugin<Log> {
    PluginBuilder::new("test_libplugin", Vec::new())
        .command(CommandSpec::new("echo", echo).description("Echo the params."))
        .command(CommandSpec::new("legacy", legacy).deprecated())
        .command(CommandSpec::new("twice", twice))
        .command(CommandSpec::new("silent", silent))
        .command(CommandSpec::new("broken", broken))
        .command(CommandSpec::new("pair", pair))
        .command(CommandSpec::new("quit", quit))
        .hook(HookRegistration::new("peer_connected", stage_continue).after(["helper"]))
        .hook(HookRegistration::new("peer_connected", stage_helper).owned_by("helper"))
        .hook(HookRegistration::new("db_write", stage_reject))
        .hook(HookRegistration::new("db_write", stage_continue).owned_by("late").after(["test_libplugin"]))
        .subscribe("connect", remember)
        .subscribe("connect", refuse)
        .subscribe(crate::WILDCARD_TOPIC, remember)
        .option(
            PluginOption::new("somearg", OptionKind::String, "Some argument")
                .with_default(OptionValue::String("default".into())),
        )
        .option(PluginOption::new("old-arg", OptionKind::String, "Old argument").deprecated())
        .option(PluginOption::new("count", OptionKind::Int, "A number"))
        .on_init(init_reads_options)
        .build()
        .expect("valid plugin")
}

#[rstest]
#[case::blank_name(PluginBuilder::new(" ", Vec::new()))]
#[case::hook_named_like_command(
    PluginBuilder::new("p", Vec::new())
        .command(CommandSpec::new("echo", echo))
        .hook(HookRegistration::new("echo", stage_continue))
)]
#[case::hook_named_init(PluginBuilder::new("p", Vec::new()).hook(HookRegistration::new("init", stage_continue)))]
#[case::duplicate_option(
    PluginBuilder::new("p", Vec::new())
        .option(PluginOption::new("a", OptionKind::Flag, "a"))
        .option(PluginOption::new("a", OptionKind::Int, "a again"))
)]
#[case::blank_topic(PluginBuilder::new("p", Vec::new()).subscribe("", remember))]
fn invalid_tables_are_rejected(#[case] builder: PluginBuilder<Log>) {
    assert!(matches!(builder.build(), Err(EngineError::Configuration { .. })));
}

#[test]
fn cyclic_hooks_are_rejected_at_build_time() {
    let result = PluginBuilder::new("p", Vec::new())
        .hook(HookRegistration::new("h", stage_continue).after(["other"]))
        .hook(HookRegistration::new("h", stage_helper).owned_by("other").after(["p"]))
        .build();
    assert!(matches!(result, Err(EngineError::HookCycle { .. })));
}

#[rstest]
fn manifest_lists_everything_offered(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}));
    let [OutgoingMessage::Success { id, result, .. }] = out.as_slice() else {
        panic!("expected a single success reply, got {out:?}");
    };
    assert_eq!(id, &json!(1));

    let methods: Vec<&str> = result["rpcmethods"]
        .as_array()
        .expect("rpcmethods")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(methods, vec!["echo", "legacy", "twice", "silent", "broken", "pair", "quit"]);
    assert_eq!(result["subscriptions"], json!(["connect", "*"]));
    assert_eq!(result["options"].as_array().map(Vec::len), Some(3));
    assert_eq!(result["hooks"].as_array().map(Vec::len), Some(4));
    assert_eq!(result["dynamic"], json!(true));
    assert_eq!(result["nonnumericids"], json!(true));
}

#[rstest]
fn deprecated_entries_are_hidden_when_the_host_disallows_them(mut plugin: Plugin<Log>) {
    let out = send(
        &mut plugin,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {"allow-deprecated-apis": false}}),
    );
    let Some(OutgoingMessage::Success { result, .. }) = out.first() else {
        panic!("expected a manifest");
    };
    let offered = result.to_string();
    assert!(!offered.contains("legacy"));
    assert!(!offered.contains("old-arg"));

    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 2, "method": "legacy"}));
    assert!(matches!(
        out.as_slice(),
        [OutgoingMessage::Error { error, .. }] if error.code == crate::protocol::codes::METHOD_NOT_FOUND
    ));
}

#[rstest]
fn init_resolves_options_and_configuration(mut plugin: Plugin<Log>) {
    let out = send(
        &mut plugin,
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "init",
            "params": {"options": {"count": "12"}, "configuration": {"network": "regtest"}}
        }),
    );
    assert_eq!(out, vec![OutgoingMessage::success(json!(2), json!({}))]);
    assert_eq!(plugin.state(), &vec!["default@regtest".to_owned()]);
    assert_eq!(plugin.options().int("count"), Some(12));
}

#[rstest]
fn ill_typed_options_fail_init_and_exit(mut plugin: Plugin<Log>) {
    let outcome = plugin
        .receive(&line(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "init",
            "params": {"options": {"count": "many"}}
        })))
        .expect("handled");
    assert_eq!(outcome, Some(RunOutcome::Exited(1)));
    assert!(matches!(
        plugin.take_outgoing().as_slice(),
        [OutgoingMessage::Error { error, .. }] if error.code == crate::protocol::codes::INVALID_PARAMS
    ));
}

#[test]
fn init_without_a_handler_accepts() {
    let mut plugin = PluginBuilder::new("bare", Vec::new()).build().expect("valid");
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": "x", "method": "init", "params": {}}));
    assert_eq!(out, vec![OutgoingMessage::success(json!("x"), json!({}))]);
}

#[test]
fn disabling_at_init_replies_then_exits_cleanly() {
    let mut plugin = PluginBuilder::new("shy", Vec::new())
        .on_init(init_disables)
        .build()
        .expect("valid");
    let outcome = plugin
        .receive(&line(&json!({"jsonrpc": "2.0", "id": 1, "method": "init", "params": {}})))
        .expect("handled");
    assert_eq!(outcome, Some(RunOutcome::Exited(0)));
    assert_eq!(
        plugin.take_outgoing(),
        vec![OutgoingMessage::success(
            json!(1),
            json!({"disable": "Disabled via selfdisable option"})
        )]
    );
}

#[rstest]
#[case::number(json!(7))]
#[case::string(json!("cln:echo#42"))]
#[case::object(json!({"nested": [1, 2]}))]
fn ids_are_echoed_verbatim(mut plugin: Plugin<Log>, #[case] id: Value) {
    let out = send(
        &mut plugin,
        &json!({"jsonrpc": "2.0", "id": id.clone(), "method": "echo", "params": {"a": 1}}),
    );
    assert_eq!(out, vec![OutgoingMessage::success(id, json!({"a": 1}))]);
}

#[rstest]
fn unknown_methods_get_method_not_found(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 9, "method": "nope"}));
    assert_eq!(
        out,
        vec![OutgoingMessage::error(json!(9), RpcError::method_not_found("nope"))]
    );
}

#[rstest]
#[case::string_params(
    r#"{"jsonrpc":"2.0","id":5,"method":"echo","params":"Bob"}"#,
    codes::INVALID_PARAMS
)]
#[case::numeric_method(r#"{"jsonrpc":"2.0","id":5,"method":7}"#, codes::INVALID_REQUEST)]
fn invalid_requests_are_answered_and_serving_continues(
    mut plugin: Plugin<Log>,
    #[case] raw: &str,
    #[case] code: i64,
) {
    let outcome = plugin.receive(format!("{raw}\n").as_bytes()).expect("not fatal");
    assert_eq!(outcome, None);
    let out = plugin.take_outgoing();
    assert!(
        matches!(out.as_slice(), [OutgoingMessage::Error { id, error, .. }] if id == &json!(5) && error.code == code),
        "got {out:?}"
    );

    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 6, "method": "echo", "params": {"b": 2}}));
    assert_eq!(out, vec![OutgoingMessage::success(json!(6), json!({"b": 2}))]);
}

#[rstest]
fn ids_beyond_u64_are_echoed_digit_for_digit(mut plugin: Plugin<Log>) {
    let raw = br#"{"jsonrpc":"2.0","id":340282366920938463463374607431768211456,"method":"echo"}
"#;
    plugin.receive(raw).expect("handled");
    let [reply]: [OutgoingMessage; 1] = plugin.take_outgoing().try_into().expect("one reply");
    let encoded = serde_json::to_string(&reply).expect("serialise");
    assert!(
        encoded.contains(r#""id":340282366920938463463374607431768211456"#),
        "got {encoded}"
    );
}

#[rstest]
fn malformed_json_gets_a_parse_error_reply_before_stopping(mut plugin: Plugin<Log>) {
    let mut output = Vec::new();
    let result = plugin.run(Cursor::new(b"{\"jsonrpc\":\"2.0\",,}\n".to_vec()), &mut output);

    assert!(matches!(result, Err(EngineError::Protocol { source: Some(_), .. })));
    let reply: Value = serde_json::from_slice(&output).expect("one JSON line");
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], json!(codes::PARSE_ERROR));
}

#[rstest]
fn a_second_terminal_response_is_suppressed(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 1, "method": "twice"}));
    assert_eq!(out, vec![OutgoingMessage::success(json!(1), json!(1))]);
    assert_eq!(plugin.pending_commands(), 0);
}

#[rstest]
fn finishing_without_a_response_is_fatal(mut plugin: Plugin<Log>) {
    let result = plugin.receive(&line(&json!({"jsonrpc": "2.0", "id": 1, "method": "silent"})));
    assert!(matches!(result, Err(EngineError::ProtocolViolation { .. })));
}

#[rstest]
fn handler_errors_become_internal_errors(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 4, "method": "broken"}));
    assert_eq!(
        out,
        vec![OutgoingMessage::error(
            json!(4),
            RpcError::internal_error("datastore unavailable")
        )]
    );
}

#[rstest]
fn replies_are_paired_by_id_in_any_order(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": "outer", "method": "pair"}));
    let ids: Vec<u64> = out
        .iter()
        .filter_map(|message| match message {
            OutgoingMessage::Request { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(plugin.pending_requests(), 2);

    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 2, "result": {}}));
    assert!(out.is_empty());
    assert_eq!(plugin.pending_commands(), 1);

    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
    assert_eq!(
        out,
        vec![OutgoingMessage::success(
            json!("outer"),
            json!({"order": ["second", "first"]})
        )]
    );
    assert_eq!(plugin.pending_commands(), 0);
    assert_eq!(plugin.pending_requests(), 0);
}

#[rstest]
#[case::unknown_number(json!(77))]
#[case::string(json!("1"))]
fn replies_nobody_waits_for_are_dropped(mut plugin: Plugin<Log>, #[case] id: Value) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": id, "result": {}}));
    assert!(out.is_empty());
}

#[rstest]
fn notifications_never_produce_replies(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "method": "connect", "params": {"id": "02aa"}}));
    assert!(out.is_empty());
    assert_eq!(plugin.state(), &vec!["connect".to_owned(), "connect".to_owned()]);

    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "method": "shutdown"}));
    assert!(out.is_empty());
    assert_eq!(plugin.state().len(), 3);
    assert_eq!(plugin.pending_commands(), 0);
}

#[rstest]
fn hook_chains_run_in_resolved_order(mut plugin: Plugin<Log>) {
    let out = send(
        &mut plugin,
        &json!({"jsonrpc": "2.0", "id": 5, "method": "peer_connected", "params": {"peer": {"id": "02aa"}}}),
    );
    assert_eq!(
        out,
        vec![OutgoingMessage::success(json!(5), json!({"result": "continue"}))]
    );
    assert_eq!(
        plugin.state(),
        &vec!["helper".to_owned(), "continue:test_libplugin".to_owned()]
    );
}

#[rstest]
fn a_non_continue_result_stops_the_chain(mut plugin: Plugin<Log>) {
    let out = send(&mut plugin, &json!({"jsonrpc": "2.0", "id": 6, "method": "db_write"}));
    assert_eq!(
        out,
        vec![OutgoingMessage::success(
            json!(6),
            json!({"result": "disconnect", "error": "go away"})
        )]
    );
    assert_eq!(plugin.state(), &vec!["reject".to_owned()]);
}

#[rstest]
fn exit_abandons_pending_commands(mut plugin: Plugin<Log>) {
    send(&mut plugin, &json!({"jsonrpc": "2.0", "id": "outer", "method": "pair"}));
    let outcome = plugin
        .receive(&line(&json!({"jsonrpc": "2.0", "id": 2, "method": "quit"})))
        .expect("handled");

    assert_eq!(outcome, Some(RunOutcome::Exited(3)));
    assert!(plugin.take_outgoing().is_empty());
    assert_eq!(plugin.pending_commands(), 0);
    assert_eq!(plugin.pending_requests(), 0);
    assert_eq!(plugin.exit_code(), Some(3));
}

#[rstest]
fn run_writes_json_lines_until_the_host_closes(mut plugin: Plugin<Log>) {
    let mut input = line(&json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"x": 1}}));
    input.extend(line(&json!({"jsonrpc": "2.0", "id": 2, "method": "pair"})));
    let mut output = Vec::new();

    let outcome = plugin.run(Cursor::new(input), &mut output).expect("clean run");

    assert_eq!(outcome, RunOutcome::HostClosed);
    assert_eq!(outcome.exit_code(), 0);
    let text = String::from_utf8(output).expect("utf-8");
    let lines: Vec<Value> = text
        .lines()
        .map(|raw| serde_json::from_str(raw).expect("one JSON object per line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines.first(), Some(&json!({"jsonrpc": "2.0", "id": 1, "result": {"x": 1}})));
    assert_eq!(plugin.pending_commands(), 0);
}

#[rstest]
fn run_reports_a_stream_cut_mid_message(mut plugin: Plugin<Log>) {
    let mut output = Vec::new();
    let result = plugin.run(Cursor::new(br#"{"jsonrpc": "2.0", "id": 1, "me"#.to_vec()), &mut output);
    assert!(matches!(result, Err(EngineError::Protocol { .. })));
}

#[rstest]
fn run_hands_messages_to_the_sink_in_order(mut plugin: Plugin<Log>) {
    let mut sink = MockMessageSink::new();
    let mut sequence = Sequence::new();
    sink.expect_send()
        .withf(|message| message.reply_id() == Some(&json!(1)))
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    sink.expect_send()
        .withf(|message| message.reply_id() == Some(&json!(2)))
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    sink.expect_flush()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|| Ok(()));

    let mut input = line(&json!({"jsonrpc": "2.0", "id": 1, "method": "echo"}));
    input.extend(line(&json!({"jsonrpc": "2.0", "id": 2, "method": "echo"})));
    let outcome = plugin.run_with_sink(Cursor::new(input), &mut sink).expect("clean run");
    assert_eq!(outcome, RunOutcome::HostClosed);
}

#[rstest]
fn sink_failures_stop_the_run(mut plugin: Plugin<Log>) {
    let mut sink = MockMessageSink::new();
    sink.expect_send()
        .returning(|_| Err(EngineError::protocol("pipe closed")));
    sink.expect_flush().never();

    let input = line(&json!({"jsonrpc": "2.0", "id": 1, "method": "echo"}));
    let result = plugin.run_with_sink(Cursor::new(input), &mut sink);
    assert!(matches!(result, Err(EngineError::Protocol { .. })));
}

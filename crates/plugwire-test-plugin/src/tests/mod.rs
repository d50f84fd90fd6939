//! Unit and behaviour tests for the reference plugin.

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use plugwire::{OutgoingMessage, Plugin, RpcError, RunOutcome};
use plugwire_config::Config;

use crate::{TestPluginState, plugin};


fn line(message: &Value) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(message).expect("serialisable");
    bytes.push(b'\n');
    bytes
}

fn exchange(instance: &mut Plugin<TestPluginState>, message: &Value) -> Vec<OutgoingMessage> {
    instance.receive(&line(message)).expect("message handled");
    instance.take_outgoing()
}

fn logged(messages: &[OutgoingMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutgoingMessage::Notification { method, params, .. } if method == "log" => {
                params["message"].as_str().map(str::to_owned)
            }
            _ => None,
        })
        .collect()
}

#[fixture]
fn instance() -> Plugin<TestPluginState> {
    plugin(TestPluginState::default(), &Config::default()).expect("valid plugin")
}

#[rstest]
fn manifest_advertises_the_registrations(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "getmanifest", "params": {}}),
    );
    let [OutgoingMessage::Success { result, .. }] = out.as_slice() else {
        panic!("expected one manifest, got {out:?}");
    };
    assert_eq!(
        result["hooks"],
        json!([{"name": "peer_connected", "before": ["dummy"], "after": ["dummy"]}])
    );
    assert_eq!(result["subscriptions"], json!(["connect", "shutdown"]));
    assert_eq!(result["rpcmethods"].as_array().map(Vec::len), Some(3));
    assert_eq!(result["options"].as_array().map(Vec::len), Some(4));
}

#[rstest]
fn init_logs_and_reads_the_datastore(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "init", "params": {"options": {"somearg": "test_arg"}}}),
    );
    assert_eq!(
        logged(&out),
        vec!["test_libplugin initialised!".to_owned(), "somearg = test_arg".to_owned()]
    );
    let lookups: Vec<u64> = out
        .iter()
        .filter_map(|message| match message {
            OutgoingMessage::Request { id, method, .. } if method == "listdatastore" => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(lookups, vec![1, 2]);

    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 1, "result": {"datastore": [
            {"key": ["test_libplugin", "name"], "string": "foobar", "hex": "666f6f626172"}
        ]}}),
    );
    assert_eq!(logged(&out), vec!["String name from datastore: foobar".to_owned()]);
    assert!(out.iter().all(|message| !message.is_reply()));

    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "Unknown command"}}),
    );
    assert!(logged(&out).contains(&"Hex name from datastore: NOT FOUND".to_owned()));
    assert!(out.contains(&OutgoingMessage::success(json!(1), json!({}))));
}

#[rstest]
fn somearg_deprecated_feeds_the_same_value(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "init", "params": {"options": {"somearg-deprecated": "old"}}}),
    );
    assert!(logged(&out).contains(&"somearg = old".to_owned()));
}

#[rstest]
fn selfdisable_disables_at_init(mut instance: Plugin<TestPluginState>) {
    let outcome = instance
        .receive(&line(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "init",
            "params": {"options": {"selfdisable": true}}
        })))
        .expect("handled");
    assert_eq!(outcome, Some(RunOutcome::Exited(0)));
    assert!(instance.take_outgoing().contains(&OutgoingMessage::success(
        json!(1),
        json!({"disable": "Disabled via selfdisable option"})
    )));
}

#[rstest]
#[case::object(json!({"name": 7}))]
#[case::positional(json!([true]))]
fn helloworld_rejects_non_string_names(
    mut instance: Plugin<TestPluginState>,
    #[case] params: Value,
) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 3, "method": "helloworld", "params": params}),
    );
    assert_eq!(
        out,
        vec![OutgoingMessage::error(
            json!(3),
            RpcError::invalid_params("name: should be a string")
        )]
    );
}

#[rstest]
fn helloworld_accepts_a_positional_name(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 4, "method": "helloworld", "params": ["Carol"]}),
    );
    assert!(out.contains(&OutgoingMessage::success(json!(4), json!({"hello": "Carol"}))));
    assert!(out.iter().any(|message| message.method() == Some("message")));
}

#[rstest]
fn testrpc_rejects_parameters(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 5, "method": "testrpc", "params": {"x": 1}}),
    );
    assert_eq!(
        out,
        vec![OutgoingMessage::error(
            json!(5),
            RpcError::invalid_params("testrpc takes no parameters")
        )]
    );
}

#[rstest]
fn testrpc_echoes_getinfo_failures_too(mut instance: Plugin<TestPluginState>) {
    exchange(&mut instance, &json!({"jsonrpc": "2.0", "id": 6, "method": "testrpc-deprecated"}));
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -1, "message": "busy"}}),
    );
    assert_eq!(
        out,
        vec![OutgoingMessage::success(json!(6), json!({"code": -1, "message": "busy"}))]
    );
}

#[rstest]
fn peer_connected_logs_and_continues(mut instance: Plugin<TestPluginState>) {
    let out = exchange(
        &mut instance,
        &json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "peer_connected",
            "params": {"peer": {"id": "022d223620a359a47ff7", "addr": "127.0.0.1:9735"}}
        }),
    );
    assert_eq!(logged(&out), vec!["022d223620a359a47ff7 peer_connected".to_owned()]);
    assert!(out.contains(&OutgoingMessage::success(json!(8), json!({"result": "continue"}))));
}

#[rstest]
#[case::flat(json!({"id": "02aa"}))]
#[case::wrapped(json!({"connect": {"id": "02aa"}}))]
fn connect_logs_the_peer(mut instance: Plugin<TestPluginState>, #[case] params: Value) {
    let out = exchange(
        &mut instance,
        &json!({"jsonrpc": "2.0", "method": "connect", "params": params}),
    );
    assert_eq!(logged(&out), vec!["02aa connected".to_owned()]);
    assert!(out.iter().all(|message| !message.is_reply()));
}

#[test]
fn state_passed_to_the_builder_keeps_the_plugin_alive() {
    let mut instance =
        plugin(TestPluginState::new(true), &Config::default()).expect("valid plugin");
    let outcome = instance
        .receive(&line(&json!({"jsonrpc": "2.0", "method": "shutdown"})))
        .expect("handled");
    assert_eq!(outcome, None);
    assert!(instance.state().dont_shutdown());
}

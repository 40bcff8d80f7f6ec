//! Agent end to end: rule file on disk, class-load callback, hook calls as the
//! bridge makes them, records in the sink file.

mod common;

use common::{request, ClassBuilder, TestHost, HANDLER_DESC};
use lapse::classfile::{opcodes, ClassFile, ACC_PUBLIC};
use lapse::config::AgentSettings;
use lapse::domain::{AgentError, ConfigError, Pid};
use lapse::hooks::{ObjectRef, Thrown};
use lapse::report::MetricRecord;
use lapse::Agent;
use std::path::Path;

const EXECUTION_ID: &str = "11111111-2222-4333-8444-555555555555";
const REQUEST_ID: &str = "66666666-7777-4888-9999-000000000000";

const RULES: &str = r#"{
    "entryPoints": { "handlers": ["demo.Front"] },
    "instrumentations": {
        "demo.Orders": { "total": [["int"]] }
    }
}"#;

fn settings(dir: &Path, extra: &str) -> AgentSettings {
    std::fs::write(dir.join("lapse-agent.json"), RULES).unwrap();
    let options = format!("dir={},pool=4,local_address=ci/127.0.0.1,target=shop{extra}", dir.display());
    AgentSettings::parse(&options, Pid(7)).unwrap()
}

fn records(dir: &Path) -> Vec<MetricRecord> {
    let text = std::fs::read_to_string(dir.join("lapse-agent-measuring-7.log")).unwrap();
    text.lines().map(|line| MetricRecord::parse_line(line).unwrap()).collect()
}

fn front_class() -> Vec<u8> {
    ClassBuilder::new("demo/Front").void_method("service", HANDLER_DESC).build()
}

fn orders_class() -> Vec<u8> {
    ClassBuilder::new("demo/Orders")
        .method(ACC_PUBLIC, "total", "(I)I", vec![0x1b, opcodes::IRETURN], 1, 2)
        .build()
}

#[test]
fn test_correlated_request_produces_ok_and_error_records() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::start(settings(dir.path(), ",tag.env=ci"), &TestHost { with_headers: true }).unwrap();

    let front = agent.on_class_load("demo/Front", &front_class()).expect("handler is rewritten");
    assert!(ClassFile::parse(&front).is_ok());
    assert_eq!(std::fs::read(dir.path().join("classdump/demo/Front.class")).unwrap(), front);
    assert!(agent.on_class_load("demo/Orders", &orders_class()).is_some());
    assert!(agent.on_class_load("demo/Unrelated", &orders_class()).is_none());

    // What the rewritten Front.service and Orders.total would call
    let hooks = agent.hooks();
    let servlet = ObjectRef::new("front servlet");
    let orders = ObjectRef::new("orders service");
    let service_args = [
        request(&[
            ("X-Lapse-Execution-Id", EXECUTION_ID),
            ("X-Lapse-Operation", "checkout"),
            ("X-Lapse-Request-Id", REQUEST_ID),
        ]),
        None,
    ];
    hooks.enter_pass_through(Some(&servlet), &service_args);

    let ok_args = vec![Some(ObjectRef::new(3i32))];
    hooks.enter_measuring(Some(orders.clone()), "d.Orders.total(int)", ok_args.clone());
    hooks.exit_measuring(Some(&orders), None, "d.Orders.total(int)", &ok_args);

    let failing_args = vec![Some(ObjectRef::new(-1i32))];
    hooks.enter_measuring(Some(orders.clone()), "d.Orders.total(int)", failing_args.clone());
    let thrown = Thrown::new("java.lang.IllegalArgumentException", Some("negative total".to_string()));
    hooks.exit_measuring(Some(&orders), Some(&thrown), "d.Orders.total(int)", &failing_args);

    hooks.exit_pass_through();

    // Outside any request
    hooks.enter_measuring(Some(orders.clone()), "d.Orders.total(int)", ok_args.clone());
    hooks.exit_measuring(Some(&orders), None, "d.Orders.total(int)", &ok_args);

    agent.shutdown();
    let mut records = records(dir.path());
    assert_eq!(records.len(), 3);
    records.sort_by(|a, b| a.tags["operation"].cmp(&b.tags["operation"]).then(a.tags["status"].cmp(&b.tags["status"])));

    let [error, ok, uncorrelated] = records.as_slice() else { unreachable!() };
    for correlated in [error, ok] {
        assert_eq!(correlated.tags["operation"], "checkout");
        assert_eq!(correlated.tags["executionId"], EXECUTION_ID);
        assert_eq!(correlated.tags["requestId"], REQUEST_ID);
    }
    assert_eq!(error.tags["status"], "error");
    assert_eq!(error.tags["message"], "negative total");
    assert_eq!(ok.tags["status"], "ok");
    assert!(!ok.tags.contains_key("message"));

    assert_eq!(uncorrelated.tags["operation"], "unknown");
    assert_eq!(uncorrelated.tags["executionId"], "null");

    for record in &records {
        assert_eq!(record.tags["uri"], "d.Orders.total(int)");
        assert_eq!(record.tags["uriAlias"], "d.Orders.total(int)");
        assert_eq!(record.tags["type"], "AGENT");
        assert_eq!(record.tags["pid"], std::process::id().to_string());
        assert_eq!(record.tags["localAddress"], "ci/127.0.0.1");
        assert_eq!(record.tags["target"], "shop");
        assert_eq!(record.tags["env"], "ci");
        assert!(record.fields["ti1"] >= 0);
    }
}

#[test]
fn test_unparsable_class_is_left_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::start(settings(dir.path(), ""), &TestHost { with_headers: true }).unwrap();
    assert!(agent.on_class_load("demo/Orders", b"\xCA\xFE\xBA\xBE garbage").is_none());
    // Other classes still work
    assert!(agent.on_class_load("demo/Front", &front_class()).is_some());
    agent.shutdown();
}

#[test]
fn test_dump_off_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::start(settings(dir.path(), ",dump=off"), &TestHost { with_headers: true }).unwrap();
    assert!(agent.on_class_load("demo/Front", &front_class()).is_some());
    assert!(!dir.path().join("classdump").exists());
}

#[test]
fn test_host_without_header_lookup_still_measures() {
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::start(settings(dir.path(), ""), &TestHost { with_headers: false }).unwrap();
    let hooks = agent.hooks();
    hooks.enter_pass_through(None, &[request(&[("X-Lapse-Operation", "checkout")])]);
    hooks.enter_measuring(None, "d.Orders.total(int)", vec![]);
    hooks.exit_measuring(None, None, "d.Orders.total(int)", &[]);
    hooks.exit_pass_through();
    agent.shutdown();
    // Idempotent
    agent.shutdown();

    let records = records(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tags["operation"], "unknown");
}

#[test]
fn test_missing_rule_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let settings = AgentSettings::parse(&format!("dir={}", dir.path().display()), Pid(7)).unwrap();
    let result = Agent::start(settings, &TestHost { with_headers: true });
    assert!(matches!(result, Err(AgentError::Config(ConfigError::Read { .. }))));
}

#[test]
fn test_start_from_option_string() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lapse-agent.json"), RULES).unwrap();
    let sink = dir.path().join("out/m.log");
    let options = format!("dir={},sink=file:{},local_address=ci/127.0.0.1", dir.path().display(), sink.display());
    let agent = Agent::from_options(&options, &TestHost { with_headers: true }).unwrap();
    assert_eq!(agent.settings().pool_size, 50);
    let hooks = agent.hooks();
    hooks.enter_measuring(None, "d.Orders.total(int)", vec![]);
    hooks.exit_measuring(None, None, "d.Orders.total(int)", &[]);
    agent.shutdown();

    assert_eq!(std::fs::read_to_string(&sink).unwrap().lines().count(), 1);
    assert!(dir.path().join(format!("lapse-agent-{}.log", std::process::id())).exists());
}

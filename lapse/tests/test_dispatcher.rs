mod common;

use common::{request, MapHeaderAccessor};
use lapse::domain::ReportError;
use lapse::hooks::{CorrelationExtractor, EventSubmitter, HeaderNames, HookDispatcher, ObjectRef, Thrown};
use lapse::report::MeasurementEvent;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const EXECUTION_ID: &str = "6f1c2b8e-3d4a-4e5f-9a0b-1c2d3e4f5a6b";
const REQUEST_ID: &str = "0a9b8c7d-6e5f-4a3b-8c1d-2e3f4a5b6c7d";

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<MeasurementEvent>>,
    refuse: bool,
}

impl Recorder {
    fn events(&self) -> Vec<MeasurementEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSubmitter for Recorder {
    fn submit(&self, event: MeasurementEvent) -> Result<(), ReportError> {
        if self.refuse {
            return Err(ReportError::ShuttingDown);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn dispatcher_with(accessor: bool, names: HeaderNames, extra_tags: BTreeMap<String, String>) -> (HookDispatcher, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let accessor: Option<Arc<dyn lapse::hooks::HeaderAccessor>> =
        if accessor { Some(Arc::new(MapHeaderAccessor)) } else { None };
    let hooks = HookDispatcher::new(CorrelationExtractor::new(accessor, names), recorder.clone(), extra_tags);
    (hooks, recorder)
}

fn dispatcher() -> (HookDispatcher, Arc<Recorder>) {
    dispatcher_with(true, HeaderNames::default(), BTreeMap::new())
}

fn correlated_request() -> Option<ObjectRef> {
    request(&[
        ("X-Lapse-Execution-Id", EXECUTION_ID),
        ("X-Lapse-Operation", "checkout"),
        ("X-Lapse-Request-Id", REQUEST_ID),
    ])
}

#[test]
fn test_records_inside_request_carry_correlation() {
    let (hooks, recorder) = dispatcher();
    let req = correlated_request();

    let args = vec![Some(ObjectRef::new("id-1"))];

    hooks.enter_pass_through(None, &[req, None]);
    hooks.enter_measuring(None, "c.e.Orders.place(j.l.String)", args.clone());
    hooks.exit_measuring(None, None, "c.e.Orders.place(j.l.String)", &args);
    hooks.exit_pass_through();

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.operation.as_deref(), Some("checkout"));
    assert_eq!(event.execution_id, Some(Uuid::parse_str(EXECUTION_ID).unwrap()));
    assert_eq!(event.request_id, Some(Uuid::parse_str(REQUEST_ID).unwrap()));
    assert_eq!(event.entry_type, "AGENT");
    assert_eq!(event.uri, "c.e.Orders.place(j.l.String)");
    assert_eq!(event.uri_alias, event.uri);
    assert_eq!(event.ti1, event.ti2);
    assert!(event.error_message.is_none());
    assert!(hooks.current_context().is_none());
}

#[test]
fn test_exit_args_must_be_the_same_references() {
    let (hooks, recorder) = dispatcher();
    let arg = Some(ObjectRef::new(String::from("id-1")));

    hooks.enter_measuring(None, "c.e.A.m(j.l.String)", vec![arg.clone()]);
    hooks.exit_measuring(None, None, "c.e.A.m(j.l.String)", &[arg.clone()]);
    assert_eq!(recorder.events().len(), 1);

    // Equal content, different object
    hooks.enter_measuring(None, "c.e.A.m(j.l.String)", vec![arg]);
    hooks.exit_measuring(None, None, "c.e.A.m(j.l.String)", &[Some(ObjectRef::new(String::from("id-1")))]);
    assert_eq!(recorder.events().len(), 1);
    assert_eq!(hooks.stack_depth(), 0);
}

#[test]
fn test_exception_exit_reports_error() {
    let (hooks, recorder) = dispatcher();
    hooks.enter_measuring(None, "c.e.A.fail()", vec![]);
    let thrown = Thrown::new("java.io.IOException", Some("disk full".to_string()));
    hooks.exit_measuring(None, Some(&thrown), "c.e.A.fail()", &[]);

    let events = recorder.events();
    assert_eq!(events[0].error_message.as_deref(), Some("disk full"));
    assert!(events[0].operation.is_none());
    assert!(events[0].execution_id.is_none());
}

#[test]
fn test_empty_stack_exit_is_harmless() {
    let (hooks, recorder) = dispatcher();
    hooks.exit_measuring(None, None, "c.e.A.m()", &[]);
    assert_eq!(hooks.stack_depth(), 0);
    assert!(recorder.events().is_empty());
}

#[test]
fn test_recursion_pairs_innermost_first() {
    let (hooks, recorder) = dispatcher();
    for _ in 0..3 {
        hooks.enter_measuring(None, "c.e.Tree.walk()", vec![]);
    }
    assert_eq!(hooks.stack_depth(), 3);
    for _ in 0..3 {
        hooks.exit_measuring(None, None, "c.e.Tree.walk()", &[]);
    }
    let events = recorder.events();
    assert_eq!(events.len(), 3);
    assert!(events[0].ti1 <= events[2].ti1);
}

#[test]
fn test_partial_or_malformed_headers_leave_context_unset() {
    let (hooks, _) = dispatcher();
    let cases = [
        request(&[("X-Lapse-Execution-Id", EXECUTION_ID), ("X-Lapse-Operation", "op")]),
        request(&[
            ("X-Lapse-Execution-Id", "not-a-uuid"),
            ("X-Lapse-Operation", "op"),
            ("X-Lapse-Request-Id", REQUEST_ID),
        ]),
        request(&[]),
        None,
        // Not a request object: the lookup itself fails
        Some(ObjectRef::new(42u32)),
    ];
    for first_arg in cases {
        hooks.enter_pass_through(None, &[first_arg]);
        assert!(hooks.current_context().is_none());
        hooks.exit_pass_through();
    }
    hooks.enter_pass_through(None, &[]);
    assert!(hooks.current_context().is_none());
}

#[test]
fn test_without_header_lookup_correlation_is_disabled() {
    let (hooks, recorder) = dispatcher_with(false, HeaderNames::default(), BTreeMap::new());
    hooks.enter_pass_through(None, &[correlated_request()]);
    assert!(hooks.current_context().is_none());
    hooks.enter_measuring(None, "c.e.A.m()", vec![]);
    hooks.exit_measuring(None, None, "c.e.A.m()", &[]);
    hooks.exit_pass_through();
    assert!(recorder.events()[0].operation.is_none());
}

#[test]
fn test_custom_header_names() {
    let names = HeaderNames {
        execution_id: "X-Exec".to_string(),
        operation: "X-Op".to_string(),
        request_id: "X-Req".to_string(),
    };
    let (hooks, _) = dispatcher_with(true, names, BTreeMap::new());
    hooks.enter_pass_through(None, &[request(&[("X-Exec", EXECUTION_ID), ("X-Op", "search"), ("X-Req", REQUEST_ID)])]);
    assert_eq!(hooks.current_context().map(|c| c.operation), Some("search".to_string()));
}

#[test]
fn test_context_cleared_on_exit_even_after_failure() {
    let (hooks, recorder) = dispatcher();
    hooks.enter_pass_through(None, &[correlated_request()]);
    hooks.enter_measuring(None, "c.e.A.m()", vec![]);
    hooks.exit_measuring(None, Some(&Thrown::new("java.lang.RuntimeException", None)), "c.e.A.m()", &[]);
    hooks.exit_pass_through();
    assert!(hooks.current_context().is_none());

    // Next request on the same thread has no headers
    hooks.enter_pass_through(None, &[request(&[])]);
    hooks.enter_measuring(None, "c.e.A.m()", vec![]);
    hooks.exit_measuring(None, None, "c.e.A.m()", &[]);
    hooks.exit_pass_through();

    let events = recorder.events();
    assert_eq!(events[0].operation.as_deref(), Some("checkout"));
    assert_eq!(events[0].error_message.as_deref(), Some("java.lang.RuntimeException"));
    assert!(events[1].operation.is_none());
}

#[test]
fn test_context_is_per_thread() {
    let (hooks, _) = dispatcher();
    let hooks = Arc::new(hooks);
    hooks.enter_pass_through(None, &[correlated_request()]);
    let other = Arc::clone(&hooks);
    let seen = std::thread::spawn(move || other.current_context()).join().unwrap();
    assert!(seen.is_none());
    assert!(hooks.current_context().is_some());
    hooks.exit_pass_through();
}

#[test]
fn test_extra_tags_travel_with_events() {
    let mut tags = BTreeMap::new();
    tags.insert("env".to_string(), "staging".to_string());
    let (hooks, recorder) = dispatcher_with(true, HeaderNames::default(), tags.clone());
    hooks.enter_measuring(None, "c.e.A.m()", vec![]);
    hooks.exit_measuring(None, None, "c.e.A.m()", &[]);
    assert_eq!(recorder.events()[0].extra_tags, tags);
}

#[test]
fn test_refused_submission_is_swallowed() {
    let recorder = Arc::new(Recorder { refuse: true, ..Recorder::default() });
    let hooks = HookDispatcher::new(CorrelationExtractor::new(None, HeaderNames::default()), recorder, BTreeMap::new());
    hooks.enter_measuring(None, "c.e.A.m()", vec![]);
    hooks.exit_measuring(None, None, "c.e.A.m()", &[]);
    assert_eq!(hooks.stack_depth(), 0);
}

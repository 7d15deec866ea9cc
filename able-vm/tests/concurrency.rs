use std::{
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use able_vm::{
    interpreter::ast::{BinaryOp, Pattern},
    types::{error::ErrorKind, status::Status},
    Ast, AstBuilder, Interpreter, NodeId, RuntimeConfig, RuntimeError, Value,
};

fn program(build: impl FnOnce(&AstBuilder) -> NodeId) -> (Rc<Ast>, NodeId) {
    let b = AstBuilder::new();
    let root = build(&b);
    (b.finish(), root)
}

fn run_with(
    config: RuntimeConfig,
    build: impl FnOnce(&AstBuilder) -> NodeId,
) -> (Interpreter, Result<Value, RuntimeError>) {
    let (ast, root) = program(build);
    let mut interp = Interpreter::new(config);
    let result = interp.run(&ast, root);
    (interp, result)
}

fn run(build: impl FnOnce(&AstBuilder) -> NodeId) -> (Interpreter, Value) {
    let (interp, result) = run_with(RuntimeConfig::default(), build);
    match result {
        Ok(value) => (interp, value),
        Err(e) => panic!("program failed: {e}"),
    }
}

fn handle_status(interp: &Interpreter, name: &str) -> Status {
    match interp.lookup(name) {
        Some(Value::Handle(handle)) => handle.status(),
        other => panic!("{name} is not a handle: {other:?}"),
    }
}

fn ints(values: &[i64]) -> Value {
    Value::array(values.iter().map(|n| Value::Int(*n)).collect())
}

fn call(b: &AstBuilder, name: &str, args: Vec<NodeId>) -> NodeId {
    b.call_named(name, args)
}

fn method(b: &AstBuilder, receiver: &str, name: &str, args: Vec<NodeId>) -> NodeId {
    b.method(b.ident(receiver), name, args)
}

fn new_channel(b: &AstBuilder, capacity: i64) -> NodeId {
    b.method(b.ident("Channel"), "new", vec![b.int(capacity)])
}

#[test]
fn test_status_and_value_are_memoized() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("count", b.int(0)),
            b.define(
                "h",
                b.spawn(b.block(vec![
                    b.assign("count", b.add(b.ident("count"), b.int(1))),
                    b.ident("count"),
                ])),
            ),
            b.define("first", method(b, "h", "value", vec![])),
            b.define("second", method(b, "h", "value", vec![])),
            b.array(vec![b.ident("first"), b.ident("second"), b.ident("count")]),
        ])
    });
    assert_eq!(value, ints(&[1, 1, 1]));
    assert_eq!(handle_status(&interp, "h"), Status::Resolved);
}

#[test]
fn test_cancel_before_start_runs_nothing() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("count", b.int(0)),
            b.define(
                "h",
                b.spawn(b.assign("count", b.add(b.ident("count"), b.int(1)))),
            ),
            method(b, "h", "cancel", vec![]),
            call(b, "flush", vec![]),
            b.ident("count"),
        ])
    });
    assert_eq!(value, Value::Int(0));
    assert_eq!(handle_status(&interp, "h"), Status::Cancelled);
}

#[test]
fn test_unbuffered_channel_delivers_in_send_order() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.for_(
                "i",
                b.array(vec![b.int(1), b.int(2), b.int(3)]),
                b.spawn(method(b, "ch", "send", vec![b.ident("i")])),
            ),
            call(b, "flush", vec![]),
            b.array(vec![
                method(b, "ch", "receive", vec![]),
                method(b, "ch", "receive", vec![]),
                method(b, "ch", "receive", vec![]),
            ]),
        ])
    });
    assert_eq!(value, ints(&[1, 2, 3]));
}

#[test]
fn test_buffered_try_send_respects_capacity() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 2)),
            b.define(
                "before",
                b.array(vec![
                    method(b, "ch", "try_send", vec![b.int(1)]),
                    method(b, "ch", "try_send", vec![b.int(2)]),
                    method(b, "ch", "try_send", vec![b.int(3)]),
                ]),
            ),
            b.define("drained", method(b, "ch", "receive", vec![])),
            b.define(
                "after",
                b.array(vec![
                    method(b, "ch", "try_send", vec![b.int(4)]),
                    method(b, "ch", "try_send", vec![b.int(5)]),
                ]),
            ),
            b.array(vec![b.ident("before"), b.ident("drained"), b.ident("after")]),
        ])
    });
    let expected = Value::array(vec![
        Value::array(vec![Value::Bool(true), Value::Bool(true), Value::Bool(false)]),
        Value::Int(1),
        Value::array(vec![Value::Bool(true), Value::Bool(false)]),
    ]);
    assert_eq!(value, expected);
}

#[test]
fn test_close_semantics() {
    let (_, value) = run(|b| {
        let message = || b.member(b.ident("e"), "message");
        b.block(vec![
            b.define("ch", new_channel(b, 2)),
            method(b, "ch", "send", vec![b.int(1)]),
            method(b, "ch", "close", vec![]),
            b.define(
                "second_close",
                b.rescue(
                    b.block(vec![method(b, "ch", "close", vec![]), b.str("no error")]),
                    vec![b.clause(
                        Pattern::variant("ChannelClosed", vec![Pattern::binding("e")]),
                        None,
                        message(),
                    )],
                ),
            ),
            b.define(
                "late_send",
                b.rescue(
                    b.block(vec![method(b, "ch", "send", vec![b.int(2)]), b.str("sent")]),
                    vec![b.clause(Pattern::binding("e"), None, message())],
                ),
            ),
            b.array(vec![
                b.ident("second_close"),
                method(b, "ch", "receive", vec![]),
                method(b, "ch", "receive", vec![]),
                method(b, "ch", "receive", vec![]),
                b.ident("late_send"),
                method(b, "ch", "is_closed", vec![]),
            ]),
        ])
    });
    let expected = Value::array(vec![
        Value::from("close of closed channel"),
        Value::Int(1),
        Value::Nil,
        Value::Nil,
        Value::from("send on closed channel"),
        Value::Bool(true),
    ]);
    assert_eq!(value, expected);
}

#[test]
fn test_close_wakes_parked_receiver_with_nil() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.define("h", b.spawn(method(b, "ch", "receive", vec![]))),
            call(b, "flush", vec![]),
            method(b, "ch", "close", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Nil);
    assert_eq!(handle_status(&interp, "h"), Status::Resolved);
}

#[test]
fn test_lock_race_grants_one_holder_at_a_time() {
    let (_, value) = run(|b| {
        let push = |text: &str| call(b, "push", vec![b.ident("log"), b.str(text)]);
        b.block(vec![
            b.define("m", b.method(b.ident("Mutex"), "new", vec![])),
            b.define("log", b.array(vec![])),
            b.proc_(b.block(vec![
                method(b, "m", "lock", vec![]),
                push("a locked"),
                call(b, "yield", vec![]),
                push("a unlocking"),
                method(b, "m", "unlock", vec![]),
            ])),
            b.proc_(b.block(vec![
                method(b, "m", "lock", vec![]),
                push("b locked"),
                method(b, "m", "unlock", vec![]),
            ])),
            call(b, "flush", vec![]),
            b.ident("log"),
        ])
    });
    let expected = Value::array(vec![
        Value::from("a locked"),
        Value::from("a unlocking"),
        Value::from("b locked"),
    ]);
    assert_eq!(value, expected);
}

#[test]
fn test_handle_waits_for_outer_unlock() {
    let mut interp = Interpreter::new(RuntimeConfig::default());
    let (ast, root) = program(|b| {
        b.block(vec![
            b.define("m", b.method(b.ident("Mutex"), "new", vec![])),
            method(b, "m", "lock", vec![]),
            b.define(
                "h",
                b.spawn(b.block(vec![
                    method(b, "m", "lock", vec![]),
                    b.define("x", b.int(1)),
                    method(b, "m", "unlock", vec![]),
                    b.ident("x"),
                ])),
            ),
            call(b, "flush", vec![]),
            method(b, "h", "status", vec![]),
        ])
    });
    let status = interp.run(&ast, root).unwrap();
    assert_eq!(status, Value::Status(Status::Pending));

    let (ast, root) = program(|b| {
        b.block(vec![
            method(b, "m", "unlock", vec![]),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    assert_eq!(interp.run(&ast, root).unwrap(), Value::Int(1));
    assert_eq!(handle_status(&interp, "h"), Status::Resolved);
}

fn busy_and_bump(b: &AstBuilder) -> NodeId {
    b.block(vec![
        b.define("progress", b.int(0)),
        b.define(
            "busy",
            b.spawn(b.block(vec![
                b.define("n", b.int(0)),
                b.while_(
                    b.lt(b.ident("n"), b.int(5000)),
                    b.assign("n", b.add(b.ident("n"), b.int(1))),
                ),
                b.ident("progress"),
            ])),
        ),
        b.spawn(b.assign("progress", b.add(b.ident("progress"), b.int(1)))),
        call(b, "flush", vec![]),
        method(b, "busy", "value", vec![]),
    ])
}

#[test]
fn test_time_slicing_lets_other_handles_progress() {
    let (_, result) = run_with(RuntimeConfig::default().with_time_slice(64), busy_and_bump);
    assert_eq!(result, Ok(Value::Int(1)));
}

#[test]
fn test_without_time_slicing_busy_loop_runs_to_completion() {
    let (_, result) = run_with(RuntimeConfig::default().with_time_slice(0), busy_and_bump);
    assert_eq!(result, Ok(Value::Int(0)));
}

#[test]
fn test_future_failure_wraps_raised_value() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("h", b.spawn(b.raise(b.str("boom")))),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    let Value::Error(error) = value else {
        panic!("expected an error value, got {value:?}");
    };
    assert_eq!(error.kind, ErrorKind::FutureError);
    assert!(error.message.contains("boom"));
    assert_eq!(error.cause, Some(Value::from("boom")));
    assert!(matches!(handle_status(&interp, "h"), Status::Failed(_)));
}

#[test]
fn test_proc_failure_keeps_original_message() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define(
                "h",
                b.proc_(b.raise(call(b, "error", vec![b.str("disk full")]))),
            ),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    let Value::Error(error) = value else {
        panic!("expected an error value, got {value:?}");
    };
    assert_eq!(error.kind, ErrorKind::ProcError);
    assert_eq!(&*error.message, "disk full");
    let Some(Value::Error(cause)) = &error.cause else {
        panic!("cause should be the raised error");
    };
    assert_eq!(cause.kind, ErrorKind::Error);
}

#[test]
fn test_spawned_send_is_received_from_sync_code() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.spawn(method(b, "ch", "send", vec![b.int(42)])),
            call(b, "flush", vec![]),
            b.eq(method(b, "ch", "receive", vec![]), b.int(42)),
        ])
    });
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn test_side_effects_run_once_across_suspensions() {
    let (interp, value) = run(|b| {
        let body = b.block(vec![
            b.define("total", b.int(0)),
            b.for_(
                "x",
                b.array(vec![b.int(1), b.int(2), b.int(3)]),
                b.block(vec![
                    b.if_or(
                        b.eq(b.ident("x"), b.int(2)),
                        b.block(vec![
                            call(b, "print", vec![b.str("two")]),
                            call(b, "yield", vec![]),
                            call(b, "print", vec![b.str("still two")]),
                        ]),
                        vec![b.or_clause(None, call(b, "print", vec![b.ident("x")]))],
                    ),
                    b.assign(
                        "total",
                        b.add(
                            b.ident("total"),
                            b.match_(
                                b.ident("x"),
                                vec![
                                    b.clause(
                                        Pattern::int(3),
                                        None,
                                        b.block(vec![call(b, "yield", vec![]), b.int(30)]),
                                    ),
                                    b.clause(Pattern::Wildcard, None, b.ident("x")),
                                ],
                            ),
                        ),
                    ),
                ]),
            ),
            b.ident("total"),
        ]);
        b.block(vec![
            b.define("h", b.spawn(body)),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Int(33));
    assert_eq!(interp.output(), ["1", "two", "still two", "3"]);
    let Some(Value::Handle(handle)) = interp.lookup("h") else {
        panic!("h should be a handle");
    };
    assert!(!handle.has_continuation());
    assert_eq!(handle.checkpoint_count(), 0);
}

#[test]
fn test_recursive_calls_resume_at_every_depth() {
    let (_, value) = run(|b| {
        let body = b.if_or(
            b.eq(b.ident("n"), b.int(0)),
            b.int(0),
            vec![b.or_clause(
                None,
                b.block(vec![
                    call(b, "yield", vec![]),
                    b.add(
                        b.ident("n"),
                        call(b, "sum_down", vec![b.sub(b.ident("n"), b.int(1))]),
                    ),
                ]),
            )],
        );
        b.block(vec![
            b.function("sum_down", &["n"], body),
            b.define("h", b.spawn(call(b, "sum_down", vec![b.int(4)]))),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Int(10));
}

#[test]
fn test_cancel_releases_channel_registration() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.define("h", b.spawn(method(b, "ch", "receive", vec![]))),
            call(b, "flush", vec![]),
            method(b, "h", "cancel", vec![]),
            call(b, "flush", vec![]),
            method(b, "ch", "try_send", vec![b.int(1)]),
        ])
    });
    assert_eq!(value, Value::Bool(false));
    assert_eq!(handle_status(&interp, "h"), Status::Cancelled);
    let channel = interp.resources().channel(1).unwrap();
    assert_eq!(channel.waiting_receivers(), 0);
}

#[test]
fn test_send_after_cancel_is_not_delivered_to_cancelled_receiver() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.define("h", b.spawn(method(b, "ch", "receive", vec![]))),
            call(b, "flush", vec![]),
            method(b, "h", "cancel", vec![]),
            b.define("sent", method(b, "ch", "try_send", vec![b.int(7)])),
            call(b, "flush", vec![]),
            b.array(vec![b.ident("sent"), method(b, "ch", "try_receive", vec![])]),
        ])
    });
    assert_eq!(value, Value::array(vec![Value::Bool(false), Value::Nil]));
    assert_eq!(handle_status(&interp, "h"), Status::Cancelled);
}

#[test]
fn test_unlock_after_cancel_skips_cancelled_waiter() {
    let (interp, value) = run(|b| {
        b.block(vec![
            b.define("m", b.method(b.ident("Mutex"), "new", vec![])),
            method(b, "m", "lock", vec![]),
            b.define(
                "h",
                b.spawn(b.block(vec![
                    method(b, "m", "lock", vec![]),
                    method(b, "m", "unlock", vec![]),
                ])),
            ),
            call(b, "flush", vec![]),
            method(b, "h", "cancel", vec![]),
            method(b, "m", "unlock", vec![]),
            call(b, "flush", vec![]),
            method(b, "m", "try_lock", vec![]),
        ])
    });
    assert_eq!(value, Value::Bool(true));
    assert_eq!(handle_status(&interp, "h"), Status::Cancelled);
    let mutex = interp.resources().mutex(1).unwrap();
    assert_eq!(mutex.waiting(), 0);
}

#[test]
fn test_handle_awaits_another_handle() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define(
                "a",
                b.spawn(b.block(vec![call(b, "yield", vec![]), b.int(20)])),
            ),
            b.define(
                "c",
                b.spawn(b.add(method(b, "a", "value", vec![]), b.int(1))),
            ),
            call(b, "flush", vec![]),
            method(b, "c", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Int(21));
}

#[test]
fn test_sync_value_drives_blocked_handle() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            b.define("a", b.spawn(method(b, "ch", "receive", vec![]))),
            b.spawn(method(b, "ch", "send", vec![b.int(5)])),
            method(b, "a", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Int(5));
}

#[test]
fn test_awaiting_own_value_fails_the_handle() {
    let (interp, _) = run(|b| {
        b.block(vec![
            b.define("h", b.spawn(method(b, "h", "value", vec![]))),
            call(b, "flush", vec![]),
        ])
    });
    let Status::Failed(error) = handle_status(&interp, "h") else {
        panic!("self-await should fail");
    };
    assert!(error.message.contains("cannot await its own value"));
}

#[test]
fn test_cancelled_is_visible_inside_the_handle() {
    let (interp, _) = run(|b| {
        b.block(vec![
            b.define(
                "h",
                b.spawn(b.block(vec![
                    method(b, "h", "cancel", vec![]),
                    call(b, "print", vec![call(b, "cancelled", vec![])]),
                    call(b, "yield", vec![]),
                    call(b, "print", vec![b.str("unreachable")]),
                ])),
            ),
            call(b, "flush", vec![]),
        ])
    });
    assert_eq!(interp.output(), ["true"]);
    assert_eq!(handle_status(&interp, "h"), Status::Cancelled);
}

#[test]
fn test_nil_channel_yields_forever_inside_async() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("h", b.spawn(call(b, "receive", vec![b.int(0)]))),
            b.define("ran", call(b, "flush", vec![b.int(5)])),
            method(b, "h", "cancel", vec![]),
            call(b, "flush", vec![]),
            b.array(vec![b.ident("ran"), method(b, "h", "status", vec![])]),
        ])
    });
    assert_eq!(
        value,
        Value::array(vec![Value::Int(5), Value::Status(Status::Cancelled)])
    );
}

#[test]
fn test_nil_handles_outside_async() {
    let (_, result) = run_with(RuntimeConfig::default(), |b| {
        call(b, "receive", vec![b.int(0)])
    });
    assert!(matches!(result, Err(RuntimeError::Uncaught(msg)) if msg.contains("nil channel")));

    let (_, value) = run(|b| {
        b.array(vec![
            call(b, "unlock", vec![b.int(0)]),
            call(b, "try_lock", vec![b.int(0)]),
            call(b, "try_receive", vec![b.int(0)]),
        ])
    });
    assert_eq!(
        value,
        Value::array(vec![Value::Nil, Value::Bool(false), Value::Nil])
    );
}

#[test]
fn test_sync_receive_with_nothing_runnable_is_deadlock() {
    let (_, result) = run_with(RuntimeConfig::default(), |b| {
        b.block(vec![
            b.define("ch", new_channel(b, 0)),
            method(b, "ch", "receive", vec![]),
        ])
    });
    assert!(matches!(result, Err(RuntimeError::Deadlock(_))));
}

#[test]
fn test_exit_propagates_through_flush_and_rescue() {
    let (_, result) = run_with(RuntimeConfig::default(), |b| {
        b.rescue(
            b.block(vec![
                b.spawn(call(b, "exit", vec![b.int(3)])),
                call(b, "flush", vec![]),
            ]),
            vec![b.clause(Pattern::Wildcard, None, b.str("caught"))],
        )
    });
    assert_eq!(result, Err(RuntimeError::Exit(3)));
}

#[test]
fn test_invalid_handle_is_fatal() {
    let (_, result) = run_with(RuntimeConfig::default(), |b| {
        b.rescue(
            call(b, "receive", vec![b.int(99)]),
            vec![b.clause(Pattern::Wildcard, None, b.str("caught"))],
        )
    });
    assert!(matches!(result, Err(RuntimeError::InvalidHandle(_))));
}

#[test]
fn test_interrupt_stops_the_scheduler() {
    let flag = Arc::new(AtomicBool::new(false));
    let (ast, root) = program(|b| {
        b.block(vec![b.spawn(b.int(1)), call(b, "flush", vec![])])
    });
    let mut interp = Interpreter::new(RuntimeConfig::default()).with_interrupt(flag.clone());
    flag.store(true, Ordering::SeqCst);
    assert_eq!(interp.run(&ast, root), Err(RuntimeError::Interrupted));
}

#[test]
fn test_sleeping_handles_wake_in_deadline_order() {
    let (interp, _) = run(|b| {
        let sleeper = |millis: i64, label: &str| {
            b.spawn(b.block(vec![
                call(b, "sleep_ms", vec![b.int(millis)]),
                call(b, "print", vec![b.str(label)]),
            ]))
        };
        b.block(vec![
            sleeper(20, "late"),
            sleeper(5, "early"),
            call(b, "print", vec![b.str("sync")]),
        ])
    });
    assert_eq!(interp.output(), ["sync", "early", "late"]);
}

#[test]
fn test_flush_is_rejected_inside_async() {
    let (interp, _) = run(|b| {
        b.block(vec![
            b.define("h", b.spawn(call(b, "flush", vec![]))),
            call(b, "flush", vec![]),
        ])
    });
    assert!(matches!(handle_status(&interp, "h"), Status::Failed(_)));
}

#[test]
fn test_pending_tasks_reports_queue_depth() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.spawn(b.int(1)),
            b.spawn(b.int(2)),
            b.define("queued", call(b, "pending_tasks", vec![])),
            call(b, "flush", vec![]),
            b.array(vec![b.ident("queued"), call(b, "pending_tasks", vec![])]),
        ])
    });
    assert_eq!(value, ints(&[2, 0]));
}

#[test]
fn test_pending_tasks_ignores_resumptions_already_handled() {
    let (_, value) = run(|b| {
        b.block(vec![
            b.define("joined", b.spawn(b.int(1))),
            method(b, "joined", "value", vec![]),
            b.define("cancelled", b.spawn(b.int(2))),
            method(b, "cancelled", "cancel", vec![]),
            b.define("after", call(b, "pending_tasks", vec![])),
            b.define("count", b.int(0)),
            b.spawn(b.assign("count", b.add(b.ident("count"), b.int(1)))),
            call(b, "flush", vec![b.int(1)]),
            b.array(vec![
                b.ident("after"),
                b.ident("count"),
                call(b, "pending_tasks", vec![]),
            ]),
        ])
    });
    assert_eq!(value, ints(&[0, 1, 0]));
}

#[test]
fn test_binary_operand_survives_suspension() {
    let (_, value) = run(|b| {
        let h = b.spawn(b.binary(
            BinaryOp::Mul,
            b.int(6),
            b.block(vec![call(b, "yield", vec![]), b.int(7)]),
        ));
        b.block(vec![
            b.define("h", h),
            call(b, "flush", vec![]),
            method(b, "h", "value", vec![]),
        ])
    });
    assert_eq!(value, Value::Int(42));
}

//! 内置示例程序。没有解析器，程序直接用 `AstBuilder` 构造。

use std::rc::Rc;

use able_vm::{
    interpreter::ast::{BinaryOp, Pattern},
    Ast, AstBuilder, NodeId,
};
use indexmap::IndexMap;
use serde::Serialize;

pub struct Demo {
    pub description: &'static str,
    build: fn(&AstBuilder) -> NodeId,
}

impl Demo {
    pub fn build(&self) -> (Rc<Ast>, NodeId) {
        let b = AstBuilder::new();
        let root = (self.build)(&b);
        (b.finish(), root)
    }
}

#[derive(Serialize)]
pub struct DemoInfo<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

pub fn catalog() -> IndexMap<&'static str, Demo> {
    let mut demos = IndexMap::new();
    demos.insert(
        "ping-pong",
        Demo {
            description: "a producer hands five values through an unbuffered channel",
            build: ping_pong,
        },
    );
    demos.insert(
        "pipeline",
        Demo {
            description: "two stages connected by buffered channels sum the squares of 1..5",
            build: pipeline,
        },
    );
    demos.insert(
        "mutex",
        Demo {
            description: "two procs increment a shared counter under a mutex across yields",
            build: mutex,
        },
    );
    demos.insert(
        "cancel",
        Demo {
            description: "a yielding loop is cancelled after three scheduler ticks",
            build: cancel,
        },
    );
    demos.insert(
        "failure",
        Demo {
            description: "a failing future exposes its wrapped error and original cause",
            build: failure,
        },
    );
    demos.insert(
        "fairness",
        Demo {
            description: "a CPU-bound loop is time-sliced so a second handle keeps running",
            build: fairness,
        },
    );
    demos.insert(
        "sleep",
        Demo {
            description: "timers wake sleeping handles in deadline order",
            build: sleep,
        },
    );
    demos
}

pub fn describe<'a>(demos: &'a IndexMap<&'static str, Demo>) -> Vec<DemoInfo<'a>> {
    demos
        .iter()
        .map(|(name, demo)| DemoInfo {
            name,
            description: demo.description,
        })
        .collect()
}

fn ping_pong(b: &AstBuilder) -> NodeId {
    let producer = b.block(vec![
        b.define("i", b.int(1)),
        b.while_(
            b.binary(BinaryOp::Le, b.ident("i"), b.int(5)),
            b.block(vec![
                b.method(b.ident("ch"), "send", vec![b.ident("i")]),
                b.assign("i", b.add(b.ident("i"), b.int(1))),
            ]),
        ),
        b.method(b.ident("ch"), "close", vec![]),
    ]);
    b.block(vec![
        b.define("ch", b.method(b.ident("Channel"), "new", vec![b.int(0)])),
        b.define("producer", b.spawn(producer)),
        b.define("v", b.method(b.ident("ch"), "receive", vec![])),
        b.while_(
            b.binary(BinaryOp::Ne, b.ident("v"), b.nil()),
            b.block(vec![
                b.call_named("print", vec![b.str("received"), b.ident("v")]),
                b.assign("v", b.method(b.ident("ch"), "receive", vec![])),
            ]),
        ),
        b.method(b.ident("producer"), "status", vec![]),
    ])
}

fn pipeline(b: &AstBuilder) -> NodeId {
    let source = b.block(vec![
        b.for_(
            "x",
            b.array((1..=5).map(|n| b.int(n)).collect()),
            b.method(b.ident("src"), "send", vec![b.ident("x")]),
        ),
        b.method(b.ident("src"), "close", vec![]),
    ]);
    let square = b.block(vec![
        b.define("v", b.method(b.ident("src"), "receive", vec![])),
        b.while_(
            b.binary(BinaryOp::Ne, b.ident("v"), b.nil()),
            b.block(vec![
                b.method(
                    b.ident("out"),
                    "send",
                    vec![b.binary(BinaryOp::Mul, b.ident("v"), b.ident("v"))],
                ),
                b.assign("v", b.method(b.ident("src"), "receive", vec![])),
            ]),
        ),
        b.method(b.ident("out"), "close", vec![]),
    ]);
    b.block(vec![
        b.define("src", b.method(b.ident("Channel"), "new", vec![b.int(2)])),
        b.define("out", b.method(b.ident("Channel"), "new", vec![b.int(2)])),
        b.spawn(source),
        b.spawn(square),
        b.define("total", b.int(0)),
        b.define("v", b.method(b.ident("out"), "receive", vec![])),
        b.while_(
            b.binary(BinaryOp::Ne, b.ident("v"), b.nil()),
            b.block(vec![
                b.assign("total", b.add(b.ident("total"), b.ident("v"))),
                b.assign("v", b.method(b.ident("out"), "receive", vec![])),
            ]),
        ),
        b.call_named("print", vec![b.str("sum of squares"), b.ident("total")]),
        b.ident("total"),
    ])
}

fn mutex(b: &AstBuilder) -> NodeId {
    let worker = b.for_(
        "step",
        b.array(vec![b.int(1), b.int(2), b.int(3)]),
        b.block(vec![
            b.method(b.ident("m"), "lock", vec![]),
            b.define("current", b.ident("counter")),
            b.call_named("yield", vec![]),
            b.assign("counter", b.add(b.ident("current"), b.int(1))),
            b.call_named("print", vec![b.ident("name"), b.str("->"), b.ident("counter")]),
            b.method(b.ident("m"), "unlock", vec![]),
        ]),
    );
    b.block(vec![
        b.define("m", b.method(b.ident("Mutex"), "new", vec![])),
        b.define("counter", b.int(0)),
        b.function("worker", &["name"], worker),
        b.proc_(b.call_named("worker", vec![b.str("a")])),
        b.proc_(b.call_named("worker", vec![b.str("b")])),
        b.call_named("flush", vec![]),
        b.call_named("print", vec![b.str("counter"), b.ident("counter")]),
        b.ident("counter"),
    ])
}

fn cancel(b: &AstBuilder) -> NodeId {
    let body = b.while_(
        b.bool(true),
        b.block(vec![
            b.assign("ticks", b.add(b.ident("ticks"), b.int(1))),
            b.call_named("yield", vec![]),
        ]),
    );
    b.block(vec![
        b.define("ticks", b.int(0)),
        b.define("h", b.spawn(body)),
        b.call_named("flush", vec![b.int(3)]),
        b.method(b.ident("h"), "cancel", vec![]),
        b.call_named("flush", vec![]),
        b.call_named(
            "print",
            vec![
                b.str("status"),
                b.method(b.ident("h"), "status", vec![]),
                b.str("ticks"),
                b.ident("ticks"),
            ],
        ),
        b.method(b.ident("h"), "value", vec![]),
    ])
}

fn failure(b: &AstBuilder) -> NodeId {
    b.block(vec![
        b.define("h", b.spawn(b.raise(b.str("boom")))),
        b.call_named("flush", vec![]),
        b.match_(
            b.method(b.ident("h"), "status", vec![]),
            vec![
                b.clause(
                    Pattern::variant("Failed", vec![Pattern::binding("e")]),
                    None,
                    b.call_named(
                        "print",
                        vec![
                            b.str("failed:"),
                            b.member(b.ident("e"), "message"),
                            b.str("cause:"),
                            b.member(b.ident("e"), "cause"),
                        ],
                    ),
                ),
                b.clause(
                    Pattern::Wildcard,
                    None,
                    b.call_named("print", vec![b.str("unexpected status")]),
                ),
            ],
        ),
        b.method(b.ident("h"), "value", vec![]),
    ])
}

fn fairness(b: &AstBuilder) -> NodeId {
    let busy = b.block(vec![
        b.define("n", b.int(0)),
        b.while_(
            b.lt(b.ident("n"), b.int(20000)),
            b.assign("n", b.add(b.ident("n"), b.int(1))),
        ),
        b.ident("n"),
    ]);
    let watcher = b.block(vec![
        b.define("i", b.int(0)),
        b.while_(
            b.lt(b.ident("i"), b.int(3)),
            b.block(vec![
                b.call_named(
                    "print",
                    vec![
                        b.str("watcher tick"),
                        b.ident("i"),
                        b.str("busy finished:"),
                        b.method(b.ident("busy"), "is_ready", vec![]),
                    ],
                ),
                b.assign("i", b.add(b.ident("i"), b.int(1))),
                b.call_named("yield", vec![]),
            ]),
        ),
    ]);
    b.block(vec![
        b.define("busy", b.spawn(busy)),
        b.spawn(watcher),
        b.call_named("flush", vec![]),
        b.method(b.ident("busy"), "value", vec![]),
    ])
}

fn sleep(b: &AstBuilder) -> NodeId {
    let entries = [(30, "slow"), (10, "fast"), (20, "medium")]
        .into_iter()
        .map(|(millis, label)| b.array(vec![b.int(millis), b.str(label)]))
        .collect();
    let sleeper = b.block(vec![
        b.call_named("sleep_ms", vec![b.index(b.ident("entry"), b.int(0))]),
        b.call_named("print", vec![b.str("woke"), b.index(b.ident("entry"), b.int(1))]),
    ]);
    b.block(vec![
        b.for_("entry", b.array(entries), b.proc_(sleeper)),
        b.call_named("flush", vec![]),
        b.call_named("pending_tasks", vec![]),
    ])
}

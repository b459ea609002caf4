// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_camera_base::{Message, MessageType, Object, Thread};

pub fn benchmark_dispatch(c: &mut Criterion) {
    let main = Thread::adopt("main");
    let object = Object::new().unwrap();
    let kind = MessageType::register();

    let mut group = c.benchmark_group("dispatch");
    for count in [1, 16, 256, 4096].iter() {
        group.bench_with_input(format!("invoke/{}", count), count, |b, count| {
            b.iter(|| {
                for _ in 0..*count {
                    object.invoke_method(|| {});
                }
                main.dispatch_messages(None).unwrap()
            })
        });
        group.bench_with_input(format!("message/{}", count), count, |b, count| {
            b.iter(|| {
                for i in 0..*count {
                    object.post_message(Message::with_data(kind, i));
                }
                main.dispatch_messages(None).unwrap()
            })
        });
    }
}

criterion_group!(benches, benchmark_dispatch);
criterion_main!(benches);

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_camera_base::{ConnectionType, Object, Signal, Thread};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

pub fn benchmark_emit(c: &mut Criterion) {
    let main = Thread::adopt("main");
    let receiver = Object::new().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let mut group = c.benchmark_group("emit");
    for slots in [1, 4, 16].iter() {
        let direct = Signal::new();
        let queued = Signal::new();
        for _ in 0..*slots {
            let sink = count.clone();
            direct.connect(&receiver, move |n: usize| {
                sink.fetch_add(n, Ordering::Relaxed);
            });
            let sink = count.clone();
            queued.connect_with(&receiver, ConnectionType::Queued, move |n: usize| {
                sink.fetch_add(n, Ordering::Relaxed);
            });
        }

        group.bench_with_input(format!("direct/{}", slots), &direct, |b, signal| {
            b.iter(|| signal.emit(1))
        });
        group.bench_with_input(format!("queued/{}", slots), &queued, |b, signal| {
            b.iter(|| {
                signal.emit(1);
                main.dispatch_messages(None).unwrap()
            })
        });
    }
}

/// Round trip through a worker's event loop.
pub fn benchmark_cross_thread(c: &mut Criterion) {
    let worker = Thread::new("bench");
    worker.start().unwrap();
    let receiver = Object::new_in(&worker);

    let (tx, rx) = kanal::unbounded();
    let signal = Signal::new();
    signal.connect(&receiver, move |n: u64| tx.send(n).unwrap());

    c.bench_function("emit/cross-thread", |b| {
        b.iter(|| {
            signal.emit(1);
            rx.recv().unwrap()
        })
    });

    drop(receiver);
    worker.stop();
    worker.join().unwrap();
}

criterion_group!(benches, benchmark_emit, benchmark_cross_thread);
criterion_main!(benches);

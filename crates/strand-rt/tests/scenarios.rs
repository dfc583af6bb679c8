// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end channel and select behavior, exercised the way language-level
//! programs use the runtime: tasks talking over rendezvous and buffered
//! channels, drain loops, and selects that park, race, and re-register.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use strand_rt::{yield_now, Channel, Runtime, Select};

#[test]
fn fresh_unbuffered_channel_is_empty() {
    let ch = Channel::<i32>::new(0);
    assert_eq!(ch.len(), 0);
    assert_eq!(ch.capacity(), 0);
    assert!(!ch.is_closed());
}

#[test]
fn unbuffered_send_stream_then_close_drains_in_order() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let tx = ch.clone();
        rt2.spawn(async move {
            for i in 1..=8 {
                if i == 4 {
                    // A pause mid-stream must not disturb ordering.
                    yield_now().await;
                }
                tx.send(i).await.expect("receiver drains every value");
            }
            tx.close().expect("first close");
        });

        assert_eq!(ch.recv().await, Some(1));
        let mut got = vec![1];
        while let Some(v) = ch.recv().await {
            got.push(v);
            // No value is ever parked in the channel itself.
            assert_eq!(ch.len(), 0);
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        // The terminal state is idempotent.
        assert_eq!(ch.recv().await, None);
        assert_eq!(ch.recv().await, None);
    });
}

#[test]
fn wide_values_rendezvous() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    rt.block_on(async move {
        let ch = Channel::<(f64, f64)>::new(0);
        let tx = ch.clone();
        rt2.spawn(async move {
            tx.send((7.0, 10.5)).await.unwrap();
        });
        assert_eq!(ch.recv().await, Some((7.0, 10.5)));
    });
}

#[test]
fn three_senders_one_slow_receiver() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let sum = rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        for n in [10, 23, 40] {
            let tx = ch.clone();
            rt2.spawn(async move {
                tx.send(n).await.unwrap();
                tx.send(n + 1).await.unwrap();
            });
        }
        let mut sum = 0;
        for _ in 0..6 {
            sum += ch.recv().await.expect("six values are in flight");
            yield_now().await;
        }
        sum
    });
    assert_eq!(sum, 10 + 11 + 23 + 24 + 40 + 41);
}

#[test]
fn three_receivers_one_slow_sender() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let total = rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let results = Channel::<i32>::new(3);
        for _ in 0..3 {
            let rx = ch.clone();
            let out = results.clone();
            rt2.spawn(async move {
                let a = rx.recv().await.expect("sender provides a value");
                let b = rx.recv().await.expect("sender provides a value");
                out.send(a + b).await.unwrap();
            });
        }
        for n in 0..6 {
            yield_now().await;
            ch.send(12 + n).await.unwrap();
        }
        let mut total = 0;
        for _ in 0..3 {
            total += results.recv().await.expect("each receiver reports");
        }
        total
    });
    assert_eq!(total, 12 + 13 + 14 + 15 + 16 + 17);
}

#[test]
fn iterator_style_drain_loop() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let sum = rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let tx = ch.clone();
        rt2.spawn(async move {
            for i in 0..100 {
                tx.send(i).await.unwrap();
            }
            tx.close().unwrap();
        });
        let mut sum = 0;
        while let Some(i) = ch.recv().await {
            sum += i;
        }
        sum
    });
    assert_eq!(sum, 4950);
}

#[test]
fn caseless_select_parks_forever_while_siblings_progress() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let resumed = Arc::new(AtomicBool::new(false));
    let progress = Arc::new(AtomicUsize::new(0));
    let resumed2 = resumed.clone();
    let progress2 = progress.clone();
    rt.block_on(async move {
        rt2.spawn(async move {
            Select::<()>::new().wait().await;
            resumed2.store(true, Ordering::Relaxed);
        });
        rt2.spawn(async move {
            for _ in 0..5 {
                progress2.fetch_add(1, Ordering::Relaxed);
                yield_now().await;
            }
        });
        for _ in 0..10 {
            yield_now().await;
        }
    });
    assert_eq!(progress.load(Ordering::Relaxed), 5);
    assert!(!resumed.load(Ordering::Relaxed));
}

#[test]
fn select_with_only_default_completes_immediately() {
    let rt = Runtime::new();
    let v = rt.block_on(Select::new().default_case(|| "after no-op").wait());
    assert_eq!(v, "after no-op");
}

#[test]
fn select_single_send_case() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let results = Channel::<(Option<i32>, Option<i32>)>::new(1);
        let rx = ch.clone();
        let out = results.clone();
        rt2.spawn(async move {
            let a = rx.recv().await;
            let b = rx.recv().await;
            out.send((a, b)).await.unwrap();
        });

        let sent = Select::new().send(&ch, 5, |r| r.is_ok()).wait().await;
        assert!(sent);
        ch.close().unwrap();

        assert_eq!(results.recv().await, Some((Some(5), None)));
    });
}

#[test]
fn select_single_recv_case() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let got = rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let tx = ch.clone();
        rt2.spawn(async move {
            yield_now().await;
            tx.send(55).await.unwrap();
        });
        Select::new()
            .recv(&ch, |v| v.expect("sender delivers"))
            .wait()
            .await
    });
    assert_eq!(got, 55);
}

#[test]
fn select_blocks_until_one_case_is_fed() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let unready = Channel::<i32>::new(0);
    let fed = Channel::<i32>::new(0);
    let never = Channel::<i32>::new(0);
    let unready2 = unready.clone();
    let fed2 = fed.clone();
    let never2 = never.clone();
    let got = rt.block_on(async move {
        let feeder = fed2.clone();
        rt2.spawn(async move {
            for _ in 0..4 {
                yield_now().await;
            }
            feeder.send(55).await.unwrap();
        });
        Select::new()
            .send(&unready2, 3, |_| -> i32 {
                panic!("no receiver ever takes this")
            })
            .recv(&fed2, |v| v.expect("feeder sends before closing"))
            .recv(&never2, |_| -> i32 { panic!("never fed") })
            .wait()
            .await
    });
    assert_eq!(got, 55);

    // The losing registrations are gone: both channels behave as fresh.
    assert!(matches!(
        unready.try_recv(),
        Err(strand_rt::TryRecvError::Empty)
    ));
    assert!(matches!(
        never.try_recv(),
        Err(strand_rt::TryRecvError::Empty)
    ));
}

#[test]
fn select_recv_on_closed_channel_fires_immediately() {
    let rt = Runtime::new();
    let ch = Channel::<i32>::new(0);
    let never = Channel::<i32>::new(0);
    ch.close().unwrap();
    let got = rt.block_on(
        Select::new()
            .recv(&ch, |v| v.unwrap_or(0))
            .recv(&never, |_| -> i32 { panic!("never fed") })
            .wait(),
    );
    // Closed and drained reads as the zero value with ok=false upstream.
    assert_eq!(got, 0);
}

#[test]
fn select_send_beats_never_ready_recv() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let never = Channel::<i32>::new(0);
        let results = Channel::<i32>::new(1);
        let rx = ch.clone();
        let out = results.clone();
        rt2.spawn(async move {
            let v = rx.recv().await.expect("select send delivers");
            out.send(v).await.unwrap();
        });

        let label = Select::new()
            .send(&ch, 235, |r| {
                r.expect("receiver is parked");
                "select send"
            })
            .recv(&never, |_| -> &'static str { panic!("never fed") })
            .wait()
            .await;
        assert_eq!(label, "select send");
        assert_eq!(results.recv().await, Some(235));
    });
}

#[test]
fn buffered_channel_without_concurrency() {
    let rt = Runtime::new();
    rt.block_on(async move {
        let ch = Channel::<i32>::new(2);
        ch.send(1).await.unwrap();
        ch.send(2).await.unwrap();
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.capacity(), 2);
        assert_eq!(ch.recv().await, Some(1));
        assert_eq!(ch.recv().await, Some(2));

        // Closing with data still buffered: the data outlives the close.
        ch.send(3).await.unwrap();
        ch.send(4).await.unwrap();
        ch.close().unwrap();
        assert_eq!(ch.recv().await, Some(3));
        assert_eq!(ch.recv().await, Some(4));
        assert_eq!(ch.recv().await, None);
    });
}

#[test]
fn buffered_channel_with_excess_senders() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let leftover = rt.block_on(async move {
        let ch = Channel::<i32>::new(2);
        let done = Channel::<i32>::new(6);
        for _ in 0..4 {
            let tx = ch.clone();
            let d = done.clone();
            rt2.spawn(async move {
                tx.send(1).await.unwrap();
                d.send(1).await.unwrap();
            });
        }
        for _ in 0..2 {
            let rx = ch.clone();
            let d = done.clone();
            rt2.spawn(async move {
                rx.recv().await.expect("a sender is queued");
                d.send(1).await.unwrap();
            });
        }
        for _ in 0..6 {
            done.recv().await.expect("all six tasks report");
        }
        ch.close().unwrap();
        let mut count = 0;
        while ch.recv().await.is_some() {
            count += 1;
        }
        count
    });
    // Four sends, two receives: two values survive in the buffer.
    assert_eq!(leftover, 2);
}

#[test]
fn select_merge_re_registers_cleanly() {
    let rt = Runtime::new();
    let rt2 = rt.clone();
    let sum = rt.block_on(async move {
        let ch = Channel::<i32>::new(0);
        let sch1 = Channel::<i32>::new(0);
        let sch2 = Channel::<i32>::new(0);
        // Nothing ever receives from sch3; its cases must never fire.
        let sch3 = Channel::<i32>::new(0);

        let p1 = sch1.clone();
        rt2.spawn(async move {
            yield_now().await;
            yield_now().await;
            p1.send(1).await.unwrap();
        });
        let p2 = sch2.clone();
        rt2.spawn(async move {
            yield_now().await;
            yield_now().await;
            p2.send(2).await.unwrap();
        });

        // Merge sch1 and sch2 into ch, two values total.
        let m_in1 = sch1.clone();
        let m_in2 = sch2.clone();
        let m_out = ch.clone();
        let m_unused = sch3.clone();
        rt2.spawn(async move {
            for _ in 0..2 {
                let v = Select::new()
                    .recv(&m_in1, |v| v.expect("producer value"))
                    .recv(&m_in2, |v| v.expect("producer value"))
                    .wait()
                    .await;
                let forwarded = Select::new()
                    .send(&m_unused, v, |_| -> i32 {
                        panic!("sent to unused channel")
                    })
                    .send(&m_out, v, move |r| {
                        r.expect("merge consumer is selecting");
                        v
                    })
                    .wait()
                    .await;
                assert_eq!(forwarded, v);
            }
        });

        let mut sum = 0;
        for _ in 0..2 {
            let v = Select::new()
                .send(&sch3, sum, |_| -> i32 { panic!("sent to unused channel") })
                .recv(&ch, |v| v.expect("merger forwards two values"))
                .wait()
                .await;
            sum += v;
        }
        sum
    });
    assert_eq!(sum, 3);
}

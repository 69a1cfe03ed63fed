//! Single-writer slots under real thread interleavings

use std::sync::Arc;
use std::thread;

use airsentry_core::barrier::{CompletionBarrier, SignalSet, WaitMode};
use airsentry_core::{Modality, Reading, ResultAggregate};

fn reading_for(modality: Modality, round: i32) -> Reading {
    match modality {
        Modality::Humidity => Reading::Humidity {
            temperature_c: round,
            humidity_pct: round + 1,
        },
        Modality::Gas => Reading::Gas { level: round },
        Modality::Light => Reading::Light { intensity: round },
        Modality::Power => Reading::Power { volts: round },
        Modality::CarbonDioxide => Reading::CarbonDioxide {
            ppm: round,
            temperature_c: round,
        },
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn released_view_holds_every_reading() {
    for round in 0..200 {
        let aggregate = Arc::new(ResultAggregate::new());
        let barrier = Arc::new(CompletionBarrier::new());
        let writers = ResultAggregate::writers(&aggregate, &barrier);

        let reader = tokio::spawn({
            let aggregate = Arc::clone(&aggregate);
            let barrier = Arc::clone(&barrier);
            async move {
                let released = barrier.wait(SignalSet::all(), WaitMode::All, true).await;
                aggregate.released(released)
            }
        });

        for writer in writers {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let modality = writer.modality();
                writer.complete(Ok(reading_for(modality, round)));
            });
        }

        let view = reader.await.unwrap();
        assert!(view.is_complete(), "round {round}: {view:?}");
        for modality in Modality::ALL {
            assert_eq!(view.reading(modality), Some(reading_for(modality, round)));
        }
    }
}

#[test]
fn observed_signal_implies_visible_slot() {
    for round in 0..100 {
        let aggregate = Arc::new(ResultAggregate::new());
        let barrier = Arc::new(CompletionBarrier::new());

        let workers: Vec<_> = ResultAggregate::writers(&aggregate, &barrier)
            .into_iter()
            .map(|writer| {
                thread::spawn(move || {
                    let modality = writer.modality();
                    writer.complete(Ok(reading_for(modality, round)));
                })
            })
            .collect();

        loop {
            let raised = barrier.raised();
            let view = aggregate.released(raised);
            for modality in raised.iter() {
                assert_eq!(view.reading(modality), Some(reading_for(modality, round)));
            }
            for modality in SignalSet::<Modality>::all().difference(raised).iter() {
                assert!(view.get(modality).is_none());
            }
            if raised == SignalSet::all() {
                break;
            }
            thread::yield_now();
        }

        for worker in workers {
            worker.join().unwrap();
        }
    }
}

#[test]
fn racing_writers_leave_one_value() {
    for _ in 0..100 {
        let aggregate = Arc::new(ResultAggregate::new());
        let barrier = Arc::new(CompletionBarrier::new());
        let [first, ..] = ResultAggregate::writers(&aggregate, &barrier);
        let [second, ..] = ResultAggregate::writers(&aggregate, &barrier);

        let a = thread::spawn(move || first.complete(Ok(Reading::Humidity {
            temperature_c: 1,
            humidity_pct: 1,
        })));
        let b = thread::spawn(move || second.complete(Ok(Reading::Humidity {
            temperature_c: 2,
            humidity_pct: 2,
        })));
        a.join().unwrap();
        b.join().unwrap();

        let view = aggregate.released(SignalSet::of(Modality::Humidity));
        let kept = view.reading(Modality::Humidity).unwrap();
        assert!(matches!(
            kept,
            Reading::Humidity { temperature_c: t, humidity_pct: h } if t == h && (t == 1 || t == 2)
        ));
        assert_eq!(aggregate.released(SignalSet::all()).reading(Modality::Humidity), Some(kept));
    }
}

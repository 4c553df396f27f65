//! Envelope hot-path benchmarks: wire encode/decode and fan-out cloning.

use criterion::{criterion_group, criterion_main, Criterion};
use switchboard::{DeliveryStatus, TransportEvent, UserMessage};

fn sample_message() -> UserMessage {
    let mut msg = UserMessage::new(
        "sms_in",
        "+27821234567",
        "+27831112222",
        Some("PLAY the quiz today".into()),
    );
    msg.transport_type = "sms".into();
    msg.transport_metadata
        .insert("smsc_id".into(), serde_json::json!("smsc-7"));
    msg
}

fn bench_encode_decode(c: &mut Criterion) {
    let msg = sample_message();
    let encoded = serde_json::to_vec(&msg).expect("encode");

    c.bench_function("user_message_encode", |b| {
        b.iter(|| serde_json::to_vec(std::hint::black_box(&msg)).expect("encode"));
    });
    c.bench_function("user_message_decode", |b| {
        b.iter(|| {
            serde_json::from_slice::<UserMessage>(std::hint::black_box(&encoded)).expect("decode")
        });
    });

    let event = TransportEvent::delivery_report(
        msg.message_id,
        "sms_in",
        DeliveryStatus::Delivered,
    );
    let encoded_event = serde_json::to_vec(&event).expect("encode");
    c.bench_function("transport_event_decode", |b| {
        b.iter(|| {
            serde_json::from_slice::<TransportEvent>(std::hint::black_box(&encoded_event))
                .expect("decode")
        });
    });
}

fn bench_fan_out_clone(c: &mut Criterion) {
    let msg = sample_message();
    c.bench_function("fan_out_clone_x4", |b| {
        b.iter(|| {
            let destinations = ["appA", "appB", "appC", "appD"];
            destinations
                .iter()
                .map(|_| std::hint::black_box(msg.clone()))
                .count()
        });
    });
}

criterion_group!(benches, bench_encode_decode, bench_fan_out_clone);
criterion_main!(benches);

//! Benchmarks for activity classification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dossier_ingest::activity::ActivityClassifier;
use dossier_ingest::locator::DossierLocator;
use dossier_ingest::{ActivityEvent, ActivityKind, RichObject};

fn sample_events(count: usize) -> Vec<ActivityEvent> {
    let kinds = [
        ActivityKind::Created,
        ActivityKind::Changed,
        ActivityKind::Changed,
        ActivityKind::Deleted,
        ActivityKind::Renamed,
        ActivityKind::Other("shared_with_by".to_string()),
    ];

    (0..count)
        .map(|i| {
            let kind = kinds[i % kinds.len()].clone();
            let path = format!("/user{}/dossiers/D{}/report-{}.pdf", i % 7, i % 40, i);
            let mut event = ActivityEvent::new(i as i64 + 1, kind.clone(), path.clone());
            event
                .related_objects
                .insert((10_000 + i).to_string(), path.clone());
            if kind == ActivityKind::Renamed {
                for (param, p) in [("oldfile", format!("{}.old", path)), ("newfile", path)] {
                    event.rich_objects.insert(
                        param.to_string(),
                        RichObject {
                            object_type: "file".to_string(),
                            id: Some((10_000 + i).to_string()),
                            name: None,
                            path: Some(p),
                        },
                    );
                }
            }
            event
        })
        .collect()
}

fn bench_extract_paths(c: &mut Criterion) {
    let classifier = ActivityClassifier::new();
    let mut group = c.benchmark_group("extract_paths");

    for size in [100, 1_000, 10_000] {
        let events = sample_events(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| classifier.extract_paths(black_box(events)))
        });
    }

    group.finish();
}

fn bench_container_candidates(c: &mut Criterion) {
    let classifier = ActivityClassifier::new();
    let locator = DossierLocator::new("dossiers", "admin");
    let events = sample_events(1_000);

    c.bench_function("container_candidates_1000", |b| {
        b.iter(|| classifier.container_candidates(black_box(&events), &locator))
    });
}

criterion_group!(benches, bench_extract_paths, bench_container_candidates);
criterion_main!(benches);

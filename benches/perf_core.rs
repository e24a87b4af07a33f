use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redliner::redline::{
    apply_edits, normalize, render_diff, validate, DiffMarkers, Edit, GateConfig,
};

/// A long agreement with typographic punctuation, one numbered clause per section.
fn synthetic_contract(sections: usize) -> String {
    let mut text = String::with_capacity(sections * 400);
    for i in 0..sections {
        text.push_str(&format!(
            "{i}. SECTION {i}. The Contractor shall perform the \u{201C}Services\u{201D} \
             described in Exhibit {i}\u{2014}including all related deliverables\u{2014}within \
             {days}\u{00A0}days. Contractor shall indemnify Client against all claims \
             however caused in connection with Section {i}.\n\n",
            i = i,
            days = 30 + i % 60,
        ));
    }
    text
}

fn synthetic_edits(sections: usize, every: usize) -> Vec<Edit> {
    (0..sections)
        .step_by(every)
        .map(|i| {
            Edit::replace_block(
                format!("Section {i}"),
                format!("{i}. SECTION {i}."),
                format!("in connection with Section {i}."),
                format!(
                    "{i}. SECTION {i}. The Contractor shall perform the \"Services\" described in \
                     Exhibit {i} within thirty days. Contractor shall indemnify Client against \
                     third-party claims to the extent caused by Contractor's negligence in \
                     connection with Section {i}."
                ),
            )
        })
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    let raw = synthetic_contract(500);
    c.bench_function("normalize_500_sections", |b| {
        b.iter(|| black_box(normalize(black_box(&raw))));
    });
}

fn bench_gate_and_apply(c: &mut Criterion) {
    let source = normalize(&synthetic_contract(500));
    let edits = synthetic_edits(500, 10);

    c.bench_function("validate_50_edits", |b| {
        b.iter(|| black_box(validate(black_box(&edits), &source, None, GateConfig::default())));
    });

    c.bench_function("apply_50_edits", |b| {
        b.iter(|| black_box(apply_edits(black_box(&source), &edits)));
    });
}

fn bench_render_diff(c: &mut Criterion) {
    let source = normalize(&synthetic_contract(200));
    let modified = apply_edits(&source, &synthetic_edits(200, 5)).document;
    let markers = DiffMarkers::default();
    c.bench_function("render_diff_200_sections", |b| {
        b.iter(|| black_box(render_diff(black_box(&source), black_box(&modified), &markers)));
    });
}

criterion_group!(benches, bench_normalize, bench_gate_and_apply, bench_render_diff);
criterion_main!(benches);

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use twpipe_core::{
    Hyperparam, HyperparameterSet, ModelBuilder, ModelStore, ParameterCollection, Stage,
    VocabularySizes,
};

fn bench_artifact_round_trip(c: &mut Criterion) {
    let vocab = VocabularySizes {
        characters: 120,
        tags: 17,
        ..VocabularySizes::unknown()
    };
    let hyperparams = HyperparameterSet::new()
        .with(Hyperparam::CharDim, 32)
        .with(Hyperparam::CharHiddenDim, 64)
        .with(Hyperparam::CharNLayers, 1)
        .with(Hyperparam::WordHiddenDim, 128)
        .with(Hyperparam::WordNLayers, 2)
        .with(Hyperparam::TagDim, 32);

    let builder =
        ModelBuilder::new(Stage::Postagger, "char-lstm-crf", hyperparams, &vocab).unwrap();
    let mut params = ParameterCollection::cpu();
    builder.build(&mut params).unwrap();

    let mut store = ModelStore::in_memory();
    builder.serialize(&mut store).unwrap();
    builder.save_parameters(&params, &mut store).unwrap();
    let bytes = store.to_bytes().unwrap();

    c.bench_function("serialize_postagger", |b| {
        b.iter(|| {
            let mut store = ModelStore::in_memory();
            builder.serialize(&mut store).unwrap();
            builder.save_parameters(&params, &mut store).unwrap();
            black_box(store.to_bytes().unwrap())
        });
    });

    c.bench_function("reconstruct_postagger", |b| {
        b.iter(|| {
            let store = ModelStore::from_bytes(black_box(&bytes)).unwrap();
            let mut restored = ParameterCollection::cpu();
            ModelBuilder::reconstruct(Stage::Postagger, &vocab, &store, &mut restored).unwrap()
        });
    });
}

criterion_group!(benches, bench_artifact_round_trip);
criterion_main!(benches);

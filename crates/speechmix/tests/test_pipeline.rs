mod common;

use candle_core::Device;
use speechmix::data::{cache, load_or_prepare, DataCollatorWithPadding};
use speechmix::train::args::VariantFlags;
use speechmix_core::{ModelVariant, IGNORE_INDEX};

#[test]
fn test_prepare_caches_and_reuses_splits() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (speech, text) = common::write_model_dirs(dir.path())?;
    let corpus = common::write_dataset(dir.path())?;
    let data = common::dataset_args(&corpus, &dir.path().join("cache"));
    let loaded = common::model_args(&speech, &text, VariantFlags::default()).load(&Device::Cpu, None)?;
    assert_eq!(loaded.variant, ModelVariant::SpeechMixEED);

    let location = data.location();
    let (train, valid) = load_or_prepare(&loaded.model, &location, false)?;
    assert_eq!(train.len(), 4);
    assert_eq!(valid.len(), 2);
    assert!(cache::is_cached(&location.train_cache()));
    assert!(cache::is_cached(&location.valid_cache()));
    assert_eq!(train.lengths(), vec![300, 350, 400, 450]);

    // Lowercased, no special tokens, EOS appended, input_ids mirror labels.
    let first = train.get(0)?;
    assert_eq!(first.labels, vec![4, 5, 2]);
    assert_eq!(first.input_ids, first.labels);
    assert_eq!(train.get(2)?.labels, vec![9, 6, 10, 2]);
    assert_eq!(first.text, "Hello world");
    assert!(first.text_input_ids.is_none());

    // With the audio gone, only the cache can satisfy a second call.
    for entry in std::fs::read_dir(corpus.join("en"))? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "wav") {
            std::fs::remove_file(path)?;
        }
    }
    let (train_again, _) = load_or_prepare(&loaded.model, &location, false)?;
    assert_eq!(train_again.get(1)?, train.get(1)?);
    Ok(())
}

#[test]
fn test_self_labeled_variant_keeps_transcript_ids() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (speech, text) = common::write_model_dirs(dir.path())?;
    let corpus = common::write_dataset(dir.path())?;
    let data = common::dataset_args(&corpus, &dir.path().join("cache"));
    let flags = VariantFlags {
        speech_mix_self: true,
        ..Default::default()
    };
    let loaded = common::model_args(&speech, &text, flags).load(&Device::Cpu, None)?;
    assert!(loaded.variant.self_labeled());

    let (train, _) = load_or_prepare(&loaded.model, &data.location(), true)?;
    let row = train.get(1)?;
    assert_eq!(row.text_input_ids, Some(vec![6, 7, 8]));
    assert_eq!(row.labels.last(), Some(&2));
    assert!(row.labels.len() <= common::text_config().max_length + 1);
    assert!(!row.labels[..row.labels.len() - 1].contains(&2));
    Ok(())
}

#[test]
fn test_collated_cached_batch_masks_padding() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (speech, text) = common::write_model_dirs(dir.path())?;
    let corpus = common::write_dataset(dir.path())?;
    let data = common::dataset_args(&corpus, &dir.path().join("cache"));
    let loaded = common::model_args(&speech, &text, VariantFlags::default()).load(&Device::Cpu, None)?;
    let (train, _) = load_or_prepare(&loaded.model, &data.location(), false)?;

    let examples = train.get_many(&[0, 1, 2, 3])?;
    let collator = DataCollatorWithPadding::new(0, Some(1));
    let batch = collator.collate(&examples)?;
    let width = batch.labels[0].len();
    assert_eq!(width, 4);
    for (row, ex) in batch.labels.iter().zip(&examples) {
        assert_eq!(row.len(), width);
        for (j, &tok) in row.iter().enumerate() {
            if j < ex.labels.len() {
                assert_eq!(tok, ex.labels[j] as i64);
            } else {
                assert_eq!(tok, IGNORE_INDEX);
            }
        }
    }

    let model_batch = batch.to_model_batch(&Device::Cpu, loaded.model.dtype())?;
    let out = loaded.model.forward(&model_batch)?;
    assert!(out.loss.to_scalar::<f32>()?.is_finite());
    Ok(())
}

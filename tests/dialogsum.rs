use rust_dialogsum::bart::BartConfig;
use rust_dialogsum::data::{DialogueRecord, Split};
use rust_dialogsum::pipelines::common::{ModelType, TokenizerOption};
use rust_dialogsum::pipelines::dialogsum::{run_pipeline, DialogSumConfig, ModelCheckpoint};
use rust_dialogsum::pipelines::generation::GenerateConfig;
use rust_dialogsum::pipelines::metrics::{EvalPrediction, MetricEvaluator, MetricMap};
use rust_dialogsum::pipelines::preprocessing::{
    Preprocessor, TokenizedDataset, TokenizedExample, MAX_SOURCE_LENGTH, MAX_TARGET_LENGTH,
};
use rust_dialogsum::pipelines::seq2seq::Seq2SeqModel;
use rust_dialogsum::DialogSumError;
use rust_dialogsum::training::{EvaluationStrategy, Seq2SeqCollator, Seq2SeqTrainer, TrainingConfig};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tch::{Device, Tensor};

const VOCAB_SIZE: i64 = 100;

/// Character-level vocabulary: special tokens, printable ASCII and the byte-level space.
fn write_vocab(directory: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let mut vocab: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
    for (index, token) in ["<s>", "<pad>", "</s>", "<unk>", "<mask>"].iter().enumerate() {
        vocab.insert(token.to_string(), json!(index));
    }
    for (offset, byte) in (33u8..=126).enumerate() {
        vocab.insert((byte as char).to_string(), json!(5 + offset));
    }
    vocab.insert("Ġ".to_string(), json!(99));

    let vocab_path = directory.join("vocab.json");
    let merges_path = directory.join("merges.txt");
    fs::write(&vocab_path, serde_json::to_string(&vocab)?)?;
    fs::write(&merges_path, "#version: 0.2\n")?;
    Ok((vocab_path, merges_path))
}

fn tiny_config() -> BartConfig {
    BartConfig {
        d_model: 16,
        decoder_attention_heads: 2,
        decoder_ffn_dim: 32,
        decoder_layers: 1,
        encoder_attention_heads: 2,
        encoder_ffn_dim: 32,
        encoder_layers: 1,
        max_position_embeddings: 300,
        vocab_size: VOCAB_SIZE,
        min_length: Some(4),
        num_beams: Some(2),
        ..Default::default()
    }
}

fn tokenizer(directory: &Path) -> anyhow::Result<TokenizerOption> {
    let (vocab_path, merges_path) = write_vocab(directory)?;
    Ok(TokenizerOption::from_file(
        ModelType::Bart,
        vocab_path,
        merges_path,
        false,
        false,
    )?)
}

fn write_jsonl(path: &Path, records: &[serde_json::Value]) -> anyhow::Result<()> {
    let lines: Vec<String> = records.iter().map(|record| record.to_string()).collect();
    fs::write(path, lines.join("\n") + "\n")?;
    Ok(())
}

fn example(fname: &str, input_ids: Vec<i64>, labels: Vec<i64>) -> TokenizedExample {
    TokenizedExample {
        record: DialogueRecord {
            fname: fname.to_string(),
            dialogue: String::new(),
            summary: String::new(),
        },
        attention_mask: vec![1; input_ids.len()],
        input_ids,
        labels,
    }
}

/// Writes a randomly initialised checkpoint and the three data files under `root`.
fn pipeline_fixture(root: &Path, bart_config: BartConfig) -> anyhow::Result<DialogSumConfig> {
    let pretrained = root.join("pretrained");
    fs::create_dir_all(&pretrained)?;
    let (vocab_path, merges_path) = write_vocab(&pretrained)?;
    let weights_path = pretrained.join("rust_model.ot");
    Seq2SeqModel::from_config(bart_config, Device::Cpu)?.save(&weights_path)?;

    let train_file = root.join("dialogsum.train.jsonl");
    let validation_file = root.join("dialogsum.dev.jsonl");
    let test_file = root.join("dialogsum.test.jsonl");
    write_jsonl(
        &train_file,
        &[
            json!({"fname": "train_0", "dialogue": "#Person1#: Hi, are you free?\n#Person2#: Yes.", "summary": "#Person2# is free."}),
            json!({"fname": "train_1", "dialogue": "#Person1#: Pizza?\n#Person2#: Sure!", "summary": "They order pizza."}),
        ],
    )?;
    write_jsonl(
        &validation_file,
        &[json!({"fname": "dev_0", "dialogue": "#Person1#: Late again?\n#Person2#: Sorry.", "summary": "#Person2# is late."})],
    )?;
    write_jsonl(
        &test_file,
        &[json!({
            "fname": "test_0",
            "dialogue": "#Person1#: Coffee?\n#Person2#: No, tea.",
            "summary1": "#Person2# wants tea.",
            "summary2": "#Person2# prefers tea to coffee.",
        })],
    )?;

    Ok(DialogSumConfig {
        checkpoint: ModelCheckpoint::Local {
            config: pretrained.join("config.json"),
            vocab: vocab_path,
            merges: merges_path,
            weights: weights_path,
        },
        train_file,
        validation_file,
        test_file,
        max_source_length: 64,
        max_target_length: 32,
        training: TrainingConfig {
            output_dir: root.join("results"),
            learning_rate: 1e-3,
            num_train_epochs: 1,
            fp16: false,
            logging_steps: 1,
            disable_progress_bar: true,
            ..Default::default()
        },
        generation_max_length: 10,
        predict_num_beams: 2,
        output_file: root.join("out").join("test_output.txt"),
        model_output_path: root.join("models").join("dialogsumm-bart").join("rust_model.ot"),
        use_cuda: false,
        ..Default::default()
    })
}

#[test]
fn pipeline_end_to_end() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let directory = tempfile::tempdir()?;
    let root = directory.path();
    let config = pipeline_fixture(root, tiny_config())?;
    let output_file = config.output_file.clone();
    let model_output_path = config.model_output_path.clone();
    let results = config.training.output_dir.clone();

    let output = run_pipeline(&config)?;

    assert_eq!(output.train_output.global_step, 2);
    assert_eq!(output.summaries.len(), 1);
    let written = fs::read_to_string(&output_file)?;
    assert_eq!(written.lines().count(), 1);
    assert!(written.ends_with('\n'));
    for key in [
        "test_loss",
        "test_rouge1",
        "test_rouge2",
        "test_rougeL",
        "test_rougeLsum",
        "test_gen_len",
    ] {
        assert!(output.test_metrics.contains_key(key), "missing {key}");
    }
    assert!(output
        .frozen_variables
        .contains(&"model.shared.weight".to_string()));
    assert!(model_output_path.exists());
    assert!(model_output_path.with_file_name("config.json").exists());
    assert!(results.join("checkpoint-2").join("trainer_state.json").exists());
    Ok(())
}

#[test]
fn lengths_beyond_position_table_are_rejected() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let root = directory.path();
    let config = pipeline_fixture(
        root,
        BartConfig {
            max_position_embeddings: 16,
            ..tiny_config()
        },
    )?;
    assert_eq!(config.max_source_length, 64);

    let result = run_pipeline(&config);
    assert!(matches!(
        result,
        Err(DialogSumError::InvalidConfigurationError(_))
    ));
    assert!(!config.training.output_dir.exists());
    assert!(!config.output_file.exists());
    Ok(())
}

#[test]
fn frozen_embeddings_survive_training() -> anyhow::Result<()> {
    tch::manual_seed(1);
    let mut model = Seq2SeqModel::from_config(tiny_config(), Device::Cpu)?;
    let frozen = model.freeze_embeddings()?;
    assert_eq!(
        frozen,
        vec![
            "model.decoder.embed_positions.weight".to_string(),
            "model.encoder.embed_positions.weight".to_string(),
            "model.shared.weight".to_string(),
        ]
    );

    let before: HashMap<String, Tensor> = model
        .var_store()
        .variables()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.copy()))
        .collect();

    let dataset = TokenizedDataset {
        split: Split::Train,
        examples: vec![
            example("train_0", vec![0, 10, 11, 12, 2], vec![0, 20, 21, 2]),
            example("train_1", vec![0, 13, 14, 2], vec![0, 22, 23, 24, 2]),
        ],
    };
    let output_dir = tempfile::tempdir()?;
    let training_config = TrainingConfig {
        output_dir: output_dir.path().to_path_buf(),
        learning_rate: 1e-3,
        num_train_epochs: 2,
        fp16: false,
        evaluation_strategy: EvaluationStrategy::No,
        disable_progress_bar: true,
        ..Default::default()
    };
    let generate_config = GenerateConfig {
        max_length: 6,
        num_beams: 1,
        ..Default::default()
    };
    {
        let mut trainer = Seq2SeqTrainer::new(
            &mut model,
            training_config,
            Seq2SeqCollator::new(1, 2),
            generate_config,
        )?;
        let output = trainer.train(&dataset, &dataset)?;
        assert_eq!(output.global_step, 4);
        assert!(output.training_loss.is_finite());
        assert_eq!(trainer.state().global_step, 4);
        assert_eq!(trainer.state().epoch, 2.0);
    }

    let after = model.var_store().variables();
    let mut changed = 0;
    for (name, tensor) in &after {
        if frozen.contains(name) {
            assert!(tensor.equal(&before[name]), "{name} changed");
        } else if !tensor.equal(&before[name]) {
            changed += 1;
        }
    }
    assert!(changed > 0);
    Ok(())
}

#[test]
fn prediction_references_keep_batch_padding() -> anyhow::Result<()> {
    tch::manual_seed(2);
    let mut model = Seq2SeqModel::from_config(tiny_config(), Device::Cpu)?;
    let dataset = TokenizedDataset {
        split: Split::Test,
        examples: vec![
            example("test_0", vec![0, 10, 11, 12, 2], vec![0, 20, 21, 2]),
            example("test_1", vec![0, 13, 14, 2], vec![0, 22, 23, 24, 2]),
        ],
    };
    let output_dir = tempfile::tempdir()?;
    let training_config = TrainingConfig {
        output_dir: output_dir.path().to_path_buf(),
        per_device_eval_batch_size: 2,
        fp16: false,
        disable_progress_bar: true,
        ..Default::default()
    };
    let generate_config = GenerateConfig {
        max_length: 6,
        num_beams: 1,
        ..Default::default()
    };
    let trainer = Seq2SeqTrainer::new(
        &mut model,
        training_config,
        Seq2SeqCollator::new(1, 2),
        generate_config.clone(),
    )?
    .with_compute_metrics(|eval_prediction| {
        let padded = eval_prediction
            .label_ids
            .iter()
            .flatten()
            .filter(|id| id.is_none())
            .count();
        Ok(MetricMap::from([("padded".to_string(), padded as f64)]))
    });

    let output = trainer.predict(&dataset, &generate_config)?;
    assert_eq!(output.predictions.len(), 2);
    assert_eq!(
        output.label_ids[0],
        vec![Some(0), Some(20), Some(21), Some(2), None]
    );
    assert_eq!(
        output.label_ids[1],
        vec![Some(0), Some(22), Some(23), Some(24), Some(2)]
    );
    assert_eq!(output.metrics["test_padded"], 1.0);
    assert!(output.metrics.contains_key("test_loss"));
    Ok(())
}

#[test]
fn tokenizer_round_trip() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let tokenizer = tokenizer(directory.path())?;
    let text = "#Person1# asks #Person2# for help.";

    let token_ids = tokenizer.encode(text, MAX_SOURCE_LENGTH);
    assert_eq!(token_ids.first(), Some(&0));
    assert_eq!(token_ids.last(), Some(&2));
    assert!(!token_ids.contains(&3));
    let decoded = tokenizer.decode(&token_ids, true, true);
    assert_eq!(decoded, text);

    let reencoded = tokenizer.encode(&decoded, MAX_SOURCE_LENGTH);
    assert_eq!(reencoded, token_ids);
    assert_eq!(tokenizer.decode(&reencoded, true, true), decoded);
    Ok(())
}

#[test]
fn truncation_respects_limits() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let tokenizer = tokenizer(directory.path())?;
    let preprocessor = Preprocessor::new(&tokenizer, MAX_SOURCE_LENGTH, MAX_TARGET_LENGTH);

    let record = DialogueRecord {
        fname: "train_0".to_string(),
        dialogue: "#Person1#: Hello there. ".repeat(40),
        summary: "#Person1# greets #Person2#. ".repeat(20),
    };
    let example = preprocessor.preprocess_record(&record);
    assert_eq!(example.input_ids.len(), MAX_SOURCE_LENGTH);
    assert_eq!(example.attention_mask.len(), MAX_SOURCE_LENGTH);
    assert_eq!(example.labels.len(), MAX_TARGET_LENGTH);
    assert_eq!(example.input_ids.last(), Some(&2));

    let short = DialogueRecord {
        fname: "train_1".to_string(),
        dialogue: "#Person1#: Hi.".to_string(),
        summary: "Hi.".to_string(),
    };
    let example = preprocessor.preprocess_record(&short);
    assert!(example.input_ids.len() < MAX_SOURCE_LENGTH);
    assert!(example.attention_mask.iter().all(|value| *value == 1));
    Ok(())
}

#[test]
fn metrics_are_idempotent() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let tokenizer = tokenizer(directory.path())?;
    let evaluator = MetricEvaluator::new(&tokenizer, true)?;

    let reference = tokenizer.encode_target("#Person1# buys a train ticket. It is cheap.", 128);
    let other = tokenizer.encode_target("#Person2# sells a ticket.", 128);
    let mut padded_reference: Vec<Option<i64>> = reference.iter().copied().map(Some).collect();
    padded_reference.extend([None, None]);

    let eval_prediction = EvalPrediction {
        predictions: vec![reference.clone(), other],
        label_ids: vec![padded_reference.clone(), padded_reference],
    };
    let first = evaluator.compute(&eval_prediction)?;
    let second = evaluator.compute(&eval_prediction)?;
    assert_eq!(first, second);

    let perfect = evaluator.compute(&EvalPrediction {
        predictions: vec![reference.clone()],
        label_ids: vec![reference.iter().copied().map(Some).collect()],
    })?;
    for key in ["rouge1", "rouge2", "rougeL", "rougeLsum"] {
        assert_eq!(perfect[key], 100.0, "{key}");
    }
    assert_eq!(perfect["gen_len"], reference.len() as f64);
    assert!(first["rouge1"] < 100.0);

    let mismatched = EvalPrediction {
        predictions: vec![vec![0, 2]],
        label_ids: vec![],
    };
    assert!(evaluator.compute(&mismatched).is_err());
    Ok(())
}

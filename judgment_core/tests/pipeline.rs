use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use judgment_core::pipeline::{model_path, write_responses};
use judgment_core::{
    run, Checkpointable, DecodePolicy, JudgmentError, JudgmentTag, PipelineConfig, ReferenceKey,
    ResponseLog, RunStage, StimulusDataset, ThresholdClassifier, ThresholdLadder,
};
use ndarray::{arr2, Array4};

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("judgment_pipeline_{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Filled top-left squares of side 1..=8 on an 8×8 canvas.
fn squares(n: usize, with_aggregate: bool) -> StimulusDataset {
    let side = |i: usize| 1 + i % 8;
    let images = Array4::from_shape_fn((n, 8, 8, 1), |(i, y, x, _)| {
        if y < side(i) && x < side(i) {
            1.0
        } else {
            0.0
        }
    });
    let mut measurements = BTreeMap::new();
    if with_aggregate {
        measurements.insert(
            JudgmentTag::AggregateArea,
            (0..n).map(|i| (side(i) * side(i)) as f32).collect(),
        );
    }
    StimulusDataset::new(images, measurements).expect("valid dataset")
}

fn config_text(dir: &Path, heads: &str, mode: &str) -> String {
    let d = dir.display();
    let mode_section = match mode {
        "train" => format!(
            "[train]\ndataset = \"{d}/training.bin\"\nmodel_dir = \"{d}/models\"\nkey = \"{d}/models/key.json\"\n"
        ),
        _ => format!("[load]\nmodel_dir = \"{d}/models\"\nkey = \"{d}/models/key.json\"\n"),
    };
    format!(
        "[pipeline]\nheads = \"{heads}\"\nreferences = 8\nlog_dir = \"{d}/logs\"\n\
         [architecture]\nchannels = [4, 2]\n\
         [autoencoder]\nepochs = 1\nbatch_size = 8\nseed = 3\n\
         [head]\nepochs = 5\nbatch_size = 8\nlearning_rate = 0.01\n\
         {mode_section}\
         [evaluate]\ntest_data = \"{d}/test.bin\"\nresults = \"{d}/results_{mode}.tsv\"\n"
    )
}

#[test]
fn train_then_evaluate_writes_paired_rows() {
    let dir = scratch_dir();
    squares(16, true).save_checkpoint(dir.join("training.bin")).unwrap();
    squares(4, true).save_checkpoint(dir.join("test.bin")).unwrap();

    let config = PipelineConfig::from_str(&config_text(&dir, "both", "train")).unwrap();
    let outcome = run(&config).expect("training run succeeds");

    assert_eq!(outcome.heads.tags(), vec![JudgmentTag::MeanArea, JudgmentTag::AggregateArea]);
    let summary = outcome.evaluation.expect("evaluate section present");
    assert_eq!(summary.rows_written, 4);

    let contents = fs::read_to_string(&summary.results).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines[0],
        "Trial\tStimulus\tModelResponseMA\tModelResponseAA\tFlooredMA\tFlooredAA"
    );
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("0\t1\t"));
    assert!(lines[2].starts_with("0\t2\t"));
    assert!(lines[3].starts_with("1\t1\t"));
    assert!(lines[1..].iter().all(|line| line.split('\t').count() == 6));

    let models = dir.join("models");
    assert!(model_path(&models, JudgmentTag::MeanArea).exists());
    assert!(model_path(&models, JudgmentTag::AggregateArea).exists());
    let key = ReferenceKey::load(models.join("key.json")).unwrap();
    assert_eq!(key.ladder_for(JudgmentTag::MeanArea).unwrap().len(), 8);

    let classifier =
        ThresholdClassifier::load_checkpoint(model_path(&models, JudgmentTag::MeanArea)).unwrap();
    assert!(classifier.is_frozen());

    let head_log = fs::read_to_string(dir.join("logs").join("head_MA.jsonl")).unwrap();
    assert_eq!(head_log.lines().count(), 5);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn loaded_models_reproduce_trained_responses() {
    let dir = scratch_dir();
    squares(16, false).save_checkpoint(dir.join("training.bin")).unwrap();
    squares(6, false).save_checkpoint(dir.join("test.bin")).unwrap();

    let trained = PipelineConfig::from_str(&config_text(&dir, "MA", "train")).unwrap();
    run(&trained).expect("training run succeeds");

    let loaded = PipelineConfig::from_str(&config_text(&dir, "MA", "load")).unwrap();
    let outcome = run(&loaded).expect("load run succeeds");
    assert!(outcome.heads.heads[0].report.is_none());

    let from_training = fs::read_to_string(dir.join("results_train.tsv")).unwrap();
    let from_load = fs::read_to_string(dir.join("results_load.tsv")).unwrap();
    assert_eq!(from_training, from_load);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_measurements_abort_before_any_model_is_written() {
    let dir = scratch_dir();
    squares(8, false).save_checkpoint(dir.join("training.bin")).unwrap();
    squares(2, false).save_checkpoint(dir.join("test.bin")).unwrap();

    let config = PipelineConfig::from_str(&config_text(&dir, "AA", "train")).unwrap();
    let err = run(&config).unwrap_err();

    assert_eq!(err.stage, RunStage::LoadData);
    assert!(matches!(err.source, JudgmentError::MissingMeasurement { .. }));
    assert!(!dir.join("models").exists());
    assert!(!dir.join("results_train.tsv").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn load_mode_without_key_entry_fails() {
    let dir = scratch_dir();
    squares(16, false).save_checkpoint(dir.join("training.bin")).unwrap();
    squares(2, false).save_checkpoint(dir.join("test.bin")).unwrap();
    run(&PipelineConfig::from_str(&config_text(&dir, "MA", "train")).unwrap()).unwrap();

    let config = PipelineConfig::from_str(&config_text(&dir, "default", "load")).unwrap();
    let err = run(&config).unwrap_err();
    assert_eq!(err.stage, RunStage::LoadModelAndKey);
    assert!(matches!(err.source, JudgmentError::MissingReference { .. }));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn rejected_row_truncates_the_log_at_the_last_complete_row() {
    let dir = scratch_dir();
    let results = dir.join("results.tsv");
    let ladders = vec![
        ThresholdLadder::build(64.0, 4).unwrap(),
        ThresholdLadder::build(16.0, 4).unwrap(),
    ];
    let predictions = vec![
        arr2(&[[1u8, 1, 0, 0], [1, 0, 0, 0], [1, 1, 1, 0], [1, 1, 1, 1]]),
        arr2(&[[1u8, 0, 0, 0], [1, 1, 1, 1], [0, 0, 0, 0], [1, 0, 0, 0]]),
    ];
    let mut log =
        ResponseLog::create(&results, &[JudgmentTag::MeanArea, JudgmentTag::AggregateArea]).unwrap();

    let err = write_responses(&ladders, &predictions, DecodePolicy::Reject, &mut log).unwrap_err();
    assert_eq!(err.stage, RunStage::Decode);
    assert!(matches!(err.source, JudgmentError::DecodeAmbiguity { row: 2 }));
    assert_eq!(log.rows_written(), 2);

    let contents = fs::read_to_string(&results).unwrap();
    assert_eq!(
        contents,
        "Trial\tStimulus\tModelResponseMA\tModelResponseAA\tFlooredMA\tFlooredAA\n\
         0\t1\t16\t0\t0\t0\n\
         0\t2\t0\t12\t0\t0\n"
    );

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn lenient_policy_writes_every_row_and_marks_the_empty_one() {
    let dir = scratch_dir();
    let results = dir.join("results.tsv");
    let ladders = vec![ThresholdLadder::build(64.0, 4).unwrap()];
    let predictions = vec![arr2(&[[1u8, 0, 0, 0], [0, 0, 0, 0], [1, 1, 0, 0]])];
    let mut log = ResponseLog::create(&results, &[JudgmentTag::MeanArea]).unwrap();

    let floored =
        write_responses(&ladders, &predictions, DecodePolicy::LowestReference, &mut log).unwrap();
    assert_eq!(floored, 1);

    let contents = fs::read_to_string(&results).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec![
        "Trial\tStimulus\tModelResponseMA\tFlooredMA",
        "0\t1\t0\t0",
        "0\t2\t0\t1",
        "1\t1\t16\t0",
    ]);

    fs::remove_dir_all(&dir).ok();
}

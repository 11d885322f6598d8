//! Integration tests for the proteomics pipeline.

use proteomics_daa::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// 100 proteins, 3 vs 3 samples, 10 shifted by +2 (log2), noise sd 0.3.
fn two_group() -> SyntheticData {
    generate_two_group(&SyntheticConfig::two_group()).unwrap()
}

#[test]
fn test_recovers_shifted_proteins() {
    let data = two_group();

    let results = Pipeline::new()
        .name("limma")
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default())
        .test_moderated("conditiontreatment")
        .correct_bh()
        .classify(ClassifyConfig::new(0.01))
        .run(&data.matrix, &data.metadata)
        .unwrap();

    assert_eq!(results.len(), 100);
    assert!(results.excluded.is_empty());

    let recovery = data.ground_truth.evaluate(&results.significant_ids());
    println!("{:?}", recovery);
    assert!(recovery.true_positives >= 8);
    assert!(recovery.false_positives <= 2);

    for r in results.significant() {
        assert_eq!(r.significance, Some(Significance::Up));
        assert!(r.q_value < 0.01);
    }

    // estimates near the true shift
    for id in &data.ground_truth.differential_features {
        let r = results.get_feature(id).unwrap();
        assert!((r.estimate - 2.0).abs() < 0.8, "{}: {}", id, r.estimate);
    }
}

#[test]
fn test_robust_trend_agree_on_clean_data() {
    let data = two_group();
    let config = EbayesConfig::default().with_trend(true).with_robust(true);
    let results = run_limma(
        &data.matrix,
        &data.metadata,
        "~ condition",
        "conditiontreatment",
        config,
    )
    .unwrap();

    let recovery = data.ground_truth.evaluate(
        &results
            .significant_at(0.01)
            .iter()
            .map(|r| r.feature_id.clone())
            .collect::<Vec<_>>(),
    );
    assert!(recovery.true_positives >= 8);
    assert!(recovery.false_positives <= 2);
}

#[test]
fn test_treat_calls_fewer() {
    let data = generate_two_group(
        &SyntheticConfig::new("mixed")
            .with_dimensions(200, 4)
            .with_differential(20, 1.0)
            .with_bidirectional(true),
    )
    .unwrap();

    let run = |lfc: Option<f64>| {
        let pipeline = Pipeline::new()
            .model_lm("~ condition")
            .ebayes(EbayesConfig::default());
        let pipeline = match lfc {
            Some(lfc) => pipeline.test_treat("conditiontreatment", lfc),
            None => pipeline.test_moderated("conditiontreatment"),
        };
        pipeline
            .correct_bh()
            .run(&data.matrix, &data.metadata)
            .unwrap()
    };

    let plain = run(None);
    let treat = run(Some(0.5));
    assert!(treat.significant_at(0.05).len() <= plain.significant_at(0.05).len());
    for (p, t) in plain.iter().zip(treat.iter()) {
        assert_eq!(p.feature_id, t.feature_id);
        assert!(t.p_value >= p.p_value);
    }
}

#[test]
fn test_psm_to_protein_pipeline() {
    let data = two_group();
    let layout = PsmConfig {
        unassigned_fraction: 0.02,
        ..Default::default()
    };
    let psms = generate_psm_table(&data.matrix, &layout).unwrap();
    let n_keyed = psms
        .features()
        .column("protein")
        .unwrap()
        .iter()
        .filter(|k| !k.is_empty())
        .count();

    // aggregating without removing unkeyed rows fails
    if n_keyed < psms.n_features() {
        assert!(matches!(
            aggregate_features(&psms, "protein", AggregateMethod::Sum, MissingPolicy::Ignore),
            Err(DaaError::MissingGroupingKey { .. })
        ));
    }

    let results = Pipeline::new()
        .name("psm")
        .filter_missing_key("protein")
        .aggregate_sum("peptide")
        .aggregate_sum("protein")
        .log2()
        .normalize_median()
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default().with_robust(true))
        .test_moderated("conditiontreatment")
        .correct_bh()
        .classify(ClassifyConfig::new(0.01))
        .run(&psms, &data.metadata)
        .unwrap();

    // support counts peptides per protein
    let n_peptides = psms
        .features()
        .column("peptide")
        .unwrap()
        .into_iter()
        .collect::<std::collections::HashSet<_>>()
        .len();
    let total_support: usize = results.iter().map(|r| r.support).sum();
    assert!(total_support <= n_peptides);
    assert!(results.len() <= 100);
    assert!(results.iter().all(|r| r.support >= 1));

    let recovery = data.ground_truth.evaluate(&results.significant_ids());
    assert!(recovery.true_positives >= 8);
    assert!(recovery.false_positives <= 2);
}

#[test]
fn test_support_counts_after_two_level_aggregation() {
    let data = generate_two_group(&SyntheticConfig::default().with_dimensions(10, 2)).unwrap();
    let psms = generate_psm_table(&data.matrix, &PsmConfig::default()).unwrap();

    let peptides =
        aggregate_features(&psms, "peptide", AggregateMethod::Sum, MissingPolicy::Propagate)
            .unwrap();
    let proteins =
        aggregate_features(&peptides, "protein", AggregateMethod::Sum, MissingPolicy::Propagate)
            .unwrap();

    assert_eq!(proteins.n_features(), 10);
    let peptide_support: usize = peptides.features().support().iter().sum();
    assert_eq!(peptide_support, psms.n_features());
    let protein_support: usize = proteins.features().support().iter().sum();
    assert_eq!(protein_support, peptides.n_features());

    // sums are preserved through both levels
    for j in 0..psms.n_samples() {
        let psm_total: f64 = psms.col(j).iter().sum();
        let protein_total: f64 = proteins.col(j).iter().sum();
        assert!((psm_total - protein_total).abs() / psm_total < 1e-12);
    }
}

#[test]
fn test_pipeline_from_yaml_file() {
    let data = two_group();

    let mut yaml_file = NamedTempFile::new().unwrap();
    let yaml = Pipeline::new()
        .name("from-file")
        .normalize_median()
        .filter_missing(0.5)
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default().with_trend(true))
        .test_moderated("conditiontreatment")
        .correct_bh()
        .classify(ClassifyConfig::new(0.05).with_lfc(1.0))
        .to_config(Some("integration"))
        .to_yaml()
        .unwrap();
    write!(yaml_file, "{}", yaml).unwrap();
    yaml_file.flush().unwrap();

    let config = PipelineConfig::from_file(yaml_file.path()).unwrap();
    assert_eq!(config.description.as_deref(), Some("integration"));
    let results = Pipeline::from_config(&config)
        .run(&data.matrix, &data.metadata)
        .unwrap();

    assert_eq!(results.method, "from-file");
    for r in results.significant() {
        assert!(r.estimate.abs() > 1.0);
        assert!(r.q_value < 0.05);
    }

    let out = NamedTempFile::new().unwrap();
    results.to_tsv(out.path()).unwrap();
    let text = std::fs::read_to_string(out.path()).unwrap();
    assert_eq!(text.lines().count(), 101);
}

#[test]
fn test_metadata_mismatch_is_an_error() {
    let data = two_group();
    let short = data
        .matrix
        .subset_samples(&[0, 1, 2, 3, 4])
        .unwrap();
    let sample_ids: Vec<String> = (0..5).map(|i| format!("other_{}", i)).collect();
    let metadata = SampleMetadata::from_labels(
        "condition",
        &sample_ids,
        &["control", "control", "control", "treatment", "treatment"],
    )
    .unwrap();

    let result = Pipeline::new()
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default())
        .test_moderated("conditiontreatment")
        .correct_bh()
        .run(&short, &metadata);
    assert!(matches!(result, Err(DaaError::Pipeline(_))));
}

#[test]
fn test_enrichment_of_significant_proteins() {
    let data = two_group();
    let results = run_limma(
        &data.matrix,
        &data.metadata,
        "~ condition",
        "conditiontreatment",
        EbayesConfig::default(),
    )
    .unwrap();
    let labelled = classify(&results, &ClassifyConfig::new(0.01)).unwrap();

    let mut categories = CategoryMap::new();
    for (i, id) in data.matrix.feature_ids().iter().enumerate() {
        if data.ground_truth.is_differential(id) {
            categories.insert(id.as_str(), "stress response");
        }
        categories.insert(id.as_str(), format!("complex_{}", i % 7));
    }

    let universe: Vec<String> = labelled.iter().map(|r| r.feature_id.clone()).collect();
    let foreground = labelled.significant_ids();
    let enrichment = test_enrichment(
        &foreground,
        &universe,
        &categories,
        &EnrichmentConfig::default(),
    )
    .unwrap();

    assert_eq!(enrichment.universe_size, 100);
    let top = &enrichment.results[0];
    assert_eq!(top.category, "stress response");
    assert!(top.q_value >= top.p_value);
    assert!(top.fold_enrichment > 5.0);
}

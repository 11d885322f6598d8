//! Basic example of the spectrum-match to protein pipeline.
//!
//! This example shows how to:
//! 1. Create synthetic protein data and expand it into raw PSMs
//! 2. Aggregate, log-transform and normalize
//! 3. Fit moderated linear models and label the results
//! 4. Compare the calls with the ground truth

use proteomics_daa::prelude::*;

fn main() -> Result<()> {
    println!("=== Proteomics DAA Example ===\n");

    let data = generate_two_group(&SyntheticConfig::two_group().with_loading(0.3))?;
    let psms = generate_psm_table(&data.matrix, &PsmConfig::default())?;

    println!("Data dimensions:");
    println!("  PSMs:     {}", psms.n_features());
    println!("  Proteins: {}", data.matrix.n_features());
    println!("  Samples:  {}", psms.n_samples());
    println!();

    println!("=== Running Pipeline ===\n");

    let pipeline = Pipeline::new()
        .name("psm-to-protein")
        .filter_missing_key("protein")
        .aggregate_sum("peptide")
        .aggregate_sum("protein")
        .log2()
        .normalize_median()
        .model_lm("~ condition")
        .ebayes(EbayesConfig::default().with_robust(true))
        .test_moderated("conditiontreatment")
        .correct_bh()
        .classify(ClassifyConfig::new(0.01));

    let results = pipeline.run(&psms, &data.metadata)?;
    println!("{}", results.summary());

    println!("Top 10 proteins:");
    println!(
        "{:<10} {:>8} {:>8} {:>10} {:>10} {:>8}",
        "Protein", "logFC", "t", "p-value", "q-value", "Support"
    );
    for r in results.sorted_by_pvalue().iter().take(10) {
        println!(
            "{:<10} {:>8.3} {:>8.2} {:>10.2e} {:>10.2e} {:>8}",
            r.feature_id, r.estimate, r.statistic, r.p_value, r.q_value, r.support
        );
    }
    println!();

    let recovery = data.ground_truth.evaluate(&results.significant_ids());
    println!("=== Ground Truth ===\n");
    println!("  True positives:  {}", recovery.true_positives);
    println!("  False positives: {}", recovery.false_positives);
    println!("  Sensitivity:     {:.1}%", recovery.sensitivity() * 100.0);

    println!("\n=== Pipeline Configuration (YAML) ===\n");
    println!("{}", pipeline.to_config(Some("Example pipeline")).to_yaml()?);

    Ok(())
}

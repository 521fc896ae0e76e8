//! `carepilot history`: Show a patient's stored assessments.

use carepilot_memory::LongTermMemory;

pub async fn run(patient: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::assessment_store(&config);

    let memory = LongTermMemory::load_from(&store).await?;
    let context = memory.get_assessment_context(patient).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
        return Ok(());
    }

    println!("Assessment history for {patient}");
    println!("================================");
    println!("  Store:  {}", store.display());
    println!("  {}", context.summary_text());

    if !context.recent_assessments.is_empty() {
        println!();
        for record in &context.recent_assessments {
            println!(
                "  {}  {:>3}  {:<10} {}",
                record.assessment_date.format("%Y-%m-%d %H:%M"),
                record.score,
                record.status.as_str(),
                record.model
            );
            for factor in &record.risk_factor_summaries {
                println!(
                    "        - {} [{}] {}",
                    factor.category,
                    factor.severity.as_str(),
                    factor.title
                );
            }
        }
    }

    let patterns = memory.top_risk_patterns(5).await;
    if !patterns.is_empty() {
        println!();
        println!("  Common high-severity patterns (all patients):");
        for pattern in patterns {
            println!("    {:>3}x  {}", pattern.frequency, pattern.pattern.join(" + "));
        }
    }

    Ok(())
}

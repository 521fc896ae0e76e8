//! `carepilot assess`: Assess one patient against fixture-backed tools.

use std::path::PathBuf;
use std::sync::Arc;

use carepilot_agent::{AgentResponse, AgentService, AgentStreamEvent, PipelineResponse};
use carepilot_config::AppConfig;
use carepilot_core::provider::Provider;
use carepilot_providers::OpenAiCompatProvider;

use crate::fixtures;

pub struct AssessArgs {
    pub patient: String,
    pub fixtures: PathBuf,
    pub pipeline: bool,
    pub goal: Option<String>,
    pub json: bool,
}

pub async fn run(args: AssessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    config.memory.assessment_store = Some(super::assessment_store(&config));

    // The pipeline never calls the model, so it runs without a key.
    if !args.pipeline && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set CAREPILOT_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add provider.api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        eprintln!("  Use --pipeline to run the fixed plan without a model.");
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let tools = Arc::new(fixtures::load_registry(&args.fixtures)?);
    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
        "openai_compat",
        &config.provider.api_url,
        config.provider.api_key.clone().unwrap_or_default(),
    )?);
    let service = Arc::new(AgentService::from_config(&config, provider, tools).await?);

    let canceller = Arc::clone(&service);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling...");
            canceller.cancel_all();
        }
    });

    let outcome = if args.pipeline {
        run_pipeline(&service, &args).await
    } else {
        run_agent(&service, &args).await
    };

    service.shutdown().await;
    outcome?;

    if !args.json {
        print_usage(&service);
    }
    Ok(())
}

async fn run_pipeline(
    service: &AgentService,
    args: &AssessArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = service.run_pipeline(&args.patient, None).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_pipeline(&response);
    }
    Ok(())
}

async fn run_agent(
    service: &Arc<AgentService>,
    args: &AssessArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let goal = args
        .goal
        .clone()
        .unwrap_or_else(|| format!("Assess discharge readiness for patient {}.", args.patient));
    let mut events = service.run_agent_stream(goal, None, Some(args.patient.clone()));

    while let Some(event) = events.recv().await {
        match event {
            AgentStreamEvent::Thought { iteration, content } if !args.json => {
                eprintln!("  [{iteration}] Thought: {content}");
            }
            AgentStreamEvent::Action {
                iteration,
                tool,
                args: tool_args,
            } if !args.json => {
                eprintln!("  [{iteration}] Action:  {tool} {tool_args}");
            }
            AgentStreamEvent::Observation {
                iteration,
                content,
                success,
                ..
            } if !args.json => {
                let mark = if success { "ok" } else { "failed" };
                eprintln!("  [{iteration}] Observation ({mark}): {}", clip(&content, 160));
            }
            AgentStreamEvent::Done { response } => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                } else {
                    print_agent(&response);
                }
            }
            AgentStreamEvent::Error { message } => return Err(message.into()),
            _ => {}
        }
    }
    Ok(())
}

fn print_agent(response: &AgentResponse) {
    println!();
    for line in response.answer.lines() {
        println!("  Assistant > {line}");
    }
    println!();
    if let Some(ref assessment) = response.assessment {
        println!(
            "  Score:      {} ({})",
            assessment.score,
            assessment.status.as_str()
        );
    }
    if response.hit_max_iterations {
        println!("  Note:       iteration limit reached; answer built from observations");
    }
    if let Some(ref grounding) = response.grounding {
        println!(
            "  Grounding:  {:.0}% of {} claim(s) supported",
            grounding.grounded_ratio * 100.0,
            grounding.claims.len()
        );
        for claim in grounding.ungrounded() {
            println!("              unsupported: {}", claim.claim);
        }
    }
    let meta = &response.metadata;
    println!(
        "  Run:        {} iteration(s), {} model call(s), {} tokens, ${:.6}, {} ms",
        response.iterations, meta.llm_calls, meta.total_tokens, meta.estimated_cost_usd, meta.latency_ms
    );
    println!("  Session:    {}", response.session_id);
}

fn print_pipeline(response: &PipelineResponse) {
    println!();
    println!("  {}", response.answer);
    println!();
    for (i, wave) in response.waves.iter().enumerate() {
        let steps: Vec<String> = wave
            .iter()
            .filter_map(|order| response.steps.iter().find(|s| s.order == *order))
            .map(|s| {
                let mark = if s.result.success { "ok" } else { "failed" };
                format!("{} ({mark})", s.tool)
            })
            .collect();
        println!("  Wave {}:     {}", i + 1, steps.join(", "));
    }
    for (tool, reason) in &response.unavailable {
        println!("  Unavailable: {tool}: {reason}");
    }
    println!("  Duration:   {} ms", response.duration_ms);
    println!("  Session:    {}", response.session_id);
}

fn print_usage(service: &AgentService) {
    if let Some(engine) = service.telemetry() {
        let summary = engine.summary();
        println!(
            "  Telemetry:  {} trace(s), {} tool call(s) ({} failed), ${:.6}",
            summary.trace_count,
            summary.tool_executions,
            summary.failed_tool_executions,
            summary.total_cost_usd
        );
    }
    if let Some(queue) = service.evaluations() {
        let results = queue.results();
        let passed = results.iter().filter(|r| r.passed).count();
        println!("  Evaluation: {passed}/{} check(s) passed", results.len());
        for outcome in results.iter().filter(|r| !r.passed) {
            println!("              {} on {}: {}", outcome.evaluator, outcome.subject, outcome.detail);
        }
    }
}

fn clip(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let clipped: String = single_line.chars().take(max).collect();
    format!("{clipped}…")
}

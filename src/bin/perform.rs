//! Roll out a trained policy without learning.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use a3c::env::make_env;
use a3c::evaluate::{evaluate, load_policy, EvaluationConfig};
use a3c::policy::PolicyKind;

#[derive(Parser, Debug)]
#[command(name = "a3c-perform")]
#[command(about = "Evaluate a trained policy from a checkpoint", version)]
struct Args {
    /// Registered environment id
    #[arg(long, default_value = "CartPole-v1")]
    env_id: String,

    /// Checkpoint file, or a directory holding checkpoints
    #[arg(long)]
    checkpoint: PathBuf,

    /// Policy architecture (Mlp or Recurrent)
    #[arg(long, default_value = "Mlp")]
    policy: PolicyKind,

    /// Name of the policy inside the checkpoint [default: <Policy>Policy_global]
    #[arg(long)]
    policy_name: Option<String>,

    #[arg(long, default_value_t = 1)]
    num_episodes: usize,

    /// Render every step
    #[arg(long)]
    render: bool,

    /// Directory to record finished episodes into
    #[arg(long)]
    record: Option<PathBuf>,

    /// Act greedily instead of sampling
    #[arg(long)]
    deterministic: bool,

    #[arg(long)]
    seed: Option<u64>,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let args = Args::parse();

    let env = make_env(&args.env_id)?;
    let policy_name = args
        .policy_name
        .clone()
        .unwrap_or_else(|| args.policy.default_global_name());
    let policy = load_policy(&args.checkpoint, args.policy, &policy_name, env.as_ref())?;

    let config = EvaluationConfig::default()
        .with_num_episodes(args.num_episodes)
        .with_render(args.render)
        .with_record(args.record.clone())
        .with_seed(args.seed)
        .with_deterministic(args.deterministic);
    evaluate(env, &policy, &config)?;
    Ok(())
}

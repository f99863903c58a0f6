//! Train an A3C agent on a registered environment.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use a3c::algorithms::A3CBuilder;
use a3c::env::make_env;
use a3c::optimizer::OptimizerKind;
use a3c::policy::PolicyKind;
use a3c::training::TrainConfig;

#[derive(Parser, Debug)]
#[command(name = "a3c-train")]
#[command(about = "Train an actor-critic agent with A3C", version)]
struct Args {
    /// Registered environment id
    #[arg(long, default_value = "CartPole-v1")]
    env_id: String,

    /// Policy architecture (Mlp or Recurrent)
    #[arg(long, default_value = "Mlp")]
    policy: PolicyKind,

    /// Name of the global policy in checkpoints [default: <Policy>Policy_global]
    #[arg(long)]
    policy_name: Option<String>,

    /// Training configuration file (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optimizer (sgd, adam or rmsprop)
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Step budget in environment timesteps
    #[arg(long)]
    num_steps: Option<u64>,

    /// Directory for summaries and checkpoints
    #[arg(long)]
    logdir: Option<PathBuf>,

    #[arg(long)]
    summary_period: Option<u64>,

    #[arg(long)]
    checkpoint_period: Option<u64>,

    /// Checkpoint file or directory to resume from
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long, default_value_t = 20)]
    trajectory_length: usize,

    #[arg(long)]
    gamma: Option<f32>,

    #[arg(long)]
    lambda: Option<f32>,

    #[arg(long, default_value_t = 0.01)]
    entropy_coef: f32,

    #[arg(long, default_value_t = 0.25)]
    value_loss_coef: f32,

    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn train_config(&self) -> Result<TrainConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::default(),
        };
        if self.optimizer.is_some() || self.learning_rate.is_some() {
            let kind = self.optimizer.unwrap_or_else(|| config.optimizer.kind());
            let learning_rate = self.learning_rate.unwrap_or_else(|| config.optimizer.learning_rate());
            config.optimizer = kind.config(learning_rate);
        }
        if let Some(num_steps) = self.num_steps {
            config.num_steps = num_steps;
        }
        if let Some(logdir) = &self.logdir {
            config.logdir = logdir.clone();
        }
        if let Some(period) = self.summary_period {
            config.summary_period = period;
        }
        if let Some(period) = self.checkpoint_period {
            config.checkpoint_period = Some(period);
        }
        if let Some(checkpoint) = &self.checkpoint {
            config.checkpoint = Some(checkpoint.clone());
        }
        if let Some(gamma) = self.gamma {
            config.gamma = gamma;
        }
        if let Some(lambda) = self.lambda {
            config.lambda = lambda;
        }
        config.validate()?;
        Ok(config)
    }
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
    let config = args.train_config()?;

    let mut builder = A3CBuilder::new()
        .env(make_env(&args.env_id)?)
        .policy_kind(args.policy)
        .trajectory_length(args.trajectory_length)
        .entropy_coef(args.entropy_coef)
        .value_loss_coef(args.value_loss_coef);
    if let Some(name) = &args.policy_name {
        builder = builder.policy_name(name.clone());
    }
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    let mut a3c = builder.build()?;

    info!(env = %args.env_id, policy = %args.policy, logdir = %config.logdir.display(), "Training");
    let report = a3c.train(&config)?;
    info!(
        final_step = report.final_step,
        iterations = report.iterations,
        "Done"
    );
    Ok(())
}

use clap::ValueEnum;
use lcp_core::SolverStrategy;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StrategyChoice {
    PdipmBatched,
}

impl From<StrategyChoice> for SolverStrategy {
    fn from(choice: StrategyChoice) -> Self {
        match choice {
            StrategyChoice::PdipmBatched => SolverStrategy::PdipmBatched,
        }
    }
}

/// Integration tests for the scoring engine covering training, the end-to-end
/// scenario, ensemble safety net, selector isolation, bundle persistence,
/// hot reload and evaluation.

mod evaluation;
mod helpers;
mod reload;
mod scenario;
mod thresholds;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{
    AssetProfile, MarketModel, Result, SimError, estimate_correlation_matrix, log_returns,
};

/// Market description as read from a JSON file or HTTP payload. Rates are
/// fractions (`0.072` for 7.2%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketConfig {
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub correlation: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfig {
    pub name: String,
    #[serde(default)]
    pub expected_annual_return: Option<f64>,
    #[serde(default)]
    pub annual_volatility: Option<f64>,
    #[serde(default)]
    pub prices: Option<Vec<f64>>,
}

impl AssetConfig {
    fn profile(&self) -> Result<AssetProfile> {
        match (
            self.expected_annual_return,
            self.annual_volatility,
            self.prices.as_deref(),
        ) {
            (Some(ret), Some(vol), _) => Ok(AssetProfile::new(&self.name, ret, vol)),
            (ret, vol, Some(prices)) => {
                let derived = AssetProfile::from_prices(&self.name, prices)?;
                Ok(AssetProfile::new(
                    &self.name,
                    ret.unwrap_or(derived.expected_annual_return),
                    vol.unwrap_or(derived.annual_volatility),
                ))
            }
            _ => Err(SimError::invalid_config(format!(
                "asset {} needs expectedAnnualReturn and annualVolatility, or a price history",
                self.name
            ))),
        }
    }
}

impl MarketConfig {
    pub fn into_model(self) -> Result<MarketModel> {
        let profiles = self
            .assets
            .iter()
            .map(AssetConfig::profile)
            .collect::<Result<Vec<_>>>()?;

        let correlation = match self.correlation {
            Some(correlation) => correlation,
            None => self.estimated_correlation(&profiles)?,
        };

        let model = MarketModel::new(profiles, correlation)?;
        match self.risk_free_rate {
            Some(rate) => model.with_risk_free_rate(rate),
            None => Ok(model),
        }
    }

    fn estimated_correlation(&self, profiles: &[AssetProfile]) -> Result<Vec<Vec<f64>>> {
        let risky: Vec<&AssetConfig> = self
            .assets
            .iter()
            .zip(profiles)
            .filter(|(_, p)| !p.is_risk_free())
            .map(|(a, _)| a)
            .collect();

        let histories: Option<Vec<Vec<f64>>> = risky
            .iter()
            .map(|a| a.prices.as_deref().map(log_returns))
            .collect();

        match histories {
            Some(series) if !series.is_empty() => {
                info!(assets = series.len(), "estimating correlation from price histories");
                estimate_correlation_matrix(&series)
            }
            _ => {
                if !risky.is_empty() {
                    warn!("no correlation given and price histories incomplete; assuming independence");
                }
                let k = risky.len();
                Ok((0..k)
                    .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
                    .collect())
            }
        }
    }
}

pub fn default_market_config() -> MarketConfig {
    let asset = |name: &str, ret: f64, vol: f64| AssetConfig {
        name: name.to_string(),
        expected_annual_return: Some(ret),
        annual_volatility: Some(vol),
        prices: None,
    };
    MarketConfig {
        assets: vec![
            asset("TS", 0.072, 0.0),
            asset("Wise", 0.48, 0.4143),
            asset("ETH", 0.4018, 0.6624),
        ],
        correlation: Some(vec![vec![1.0, 0.14], vec![0.14, 1.0]]),
        risk_free_rate: None,
    }
}

/// Accepts `{"candidates": [[..]]}`, an object with exactly one list-of-lists
/// value, or a bare list of lists.
pub fn parse_candidates(json: &str) -> std::result::Result<Vec<Vec<f64>>, String> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("invalid candidates JSON: {e}"))?;

    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("candidates") {
            Some(list) => list,
            None => {
                let mut lists: Vec<Value> = map
                    .into_iter()
                    .map(|(_, v)| v)
                    .filter(|v| v.as_array().is_some_and(|a| a.iter().all(Value::is_array)))
                    .collect();
                if lists.len() != 1 {
                    return Err(format!(
                        "candidates object must hold exactly one list of weight lists, found {}",
                        lists.len()
                    ));
                }
                lists.remove(0)
            }
        },
        _ => return Err("candidates JSON must be a list or an object".to_string()),
    };

    serde_json::from_value(list).map_err(|e| format!("candidates must be lists of numbers: {e}"))
}

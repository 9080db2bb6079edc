//! ERC-20 and router ABIs, and the read-only token checks abilities share.

use std::fmt;

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, sol};
use chain::{CallRequest, Provider};
use serde::Deserialize;
use serde_json::{Number, Value, json};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
        function transfer(address to, uint256 amount) external returns (bool success);
    }

    interface IUniswapV2Router {
        function swapExactTokensForTokens(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] path,
            address to,
            uint256 deadline
        ) external returns (uint256[] amounts);
    }
}

pub async fn balance_of<P: Provider>(provider: &P, token: Address, owner: Address) -> chain::Result<U256> {
    let call = IERC20::balanceOfCall { owner };
    let output = provider
        .call(&CallRequest::new(token, call.abi_encode()))
        .await?;
    Ok(IERC20::balanceOfCall::abi_decode_returns(&output, true)?.balance)
}

pub async fn allowance<P: Provider>(
    provider: &P,
    token: Address,
    owner: Address,
    spender: Address,
) -> chain::Result<U256> {
    let call = IERC20::allowanceCall { owner, spender };
    let output = provider
        .call(&CallRequest::new(token, call.abi_encode()))
        .await?;
    Ok(IERC20::allowanceCall::abi_decode_returns(&output, true)?.remaining)
}

/// Significant digits an `f64` carries through a decimal round trip.
const F64_DIGITS: usize = 15;

/// Schema fragment for a positive decimal token amount.
///
/// Decimal strings are preferred. Plain JSON numbers are accepted while they
/// still hold the exact value the caller wrote.
pub fn amount_schema() -> Value {
    json!({
        "type": ["string", "number"],
        "pattern": "^[0-9]+(\\.[0-9]+)?$",
        "exclusiveMinimum": 0
    })
}

/// A positive token amount in whole-token units, kept as its decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAmount")]
pub struct TokenAmount(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Number(Number),
}

impl TokenAmount {
    pub fn parse(text: &str) -> Result<Self, String> {
        let (whole, fraction) = text.split_once('.').unwrap_or((text, "0"));
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || !digits(fraction) {
            return Err(format!("{text:?} is not a decimal amount"));
        }
        if whole.bytes().chain(fraction.bytes()).all(|b| b == b'0') {
            return Err("amount must be greater than zero".to_string());
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base units for a token with `decimals` decimals.
    pub fn to_units(&self, decimals: u8) -> Option<U256> {
        parse_units(&self.0, decimals)
    }
}

impl TryFrom<RawAmount> for TokenAmount {
    type Error = String;

    fn try_from(raw: RawAmount) -> Result<Self, String> {
        match raw {
            RawAmount::Text(text) => Self::parse(&text),
            RawAmount::Number(n) if n.is_u64() => Self::parse(&n.to_string()),
            RawAmount::Number(n) => {
                let value = n.as_f64().filter(|v| v.is_finite() && *v > 0.0);
                let Some(value) = value else {
                    return Err(format!("{n} is not a positive amount"));
                };
                let text = value.to_string();
                if significant_digits(&text) > F64_DIGITS {
                    return Err(format!(
                        "{n} is not exact as a JSON number, pass it as a decimal string"
                    ));
                }
                Self::parse(&text)
            }
        }
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn significant_digits(text: &str) -> usize {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.trim_start_matches('0').trim_end_matches('0').len()
}

/// Convert decimal text into base units, e.g. `"1.5"` with 6 decimals into
/// `1500000`.
///
/// Parsing is exact. Text that is not a plain decimal, or that has more
/// significant fractional digits than `decimals`, has no representation.
pub fn parse_units(amount: &str, decimals: u8) -> Option<U256> {
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    let fraction = fraction.trim_end_matches('0');
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !is_digits(whole) || !is_digits(fraction) {
        return None;
    }
    let decimals = usize::from(decimals);
    if fraction.len() > decimals {
        return None;
    }
    U256::from_str_radix(&format!("{whole}{fraction:0<decimals$}"), 10).ok()
}

//! The market engine: replays pool snapshots and executes liquidity
//! and trade operations against a shared wallet.

use crate::action::MarketAction;
use crate::broker::AssetLedger;
use crate::core;
use crate::status::{MarketBalance, MarketStatus};
use chrono::NaiveDateTime;
use primitive_types::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::debug;
use univ3_backtest_domain::math::price_codec::{decimal_price_to_sqrt_price_x96, decimal_price_to_tick, tick_to_decimal_price};
use univ3_backtest_domain::{BacktestError, Position, PositionInfo, TokenInfo, UniV3Pool};

/// Backtesting market for one Uniswap v3 pool.
///
/// State advances one [`MarketStatus`] at a time through
/// [`set_market_status`](Self::set_market_status); every other
/// operation executes at the most recent snapshot's price. The wallet
/// is shared behind `Rc<RefCell>` so several markets can settle against
/// the same balances.
pub struct UniLpMarket<L: AssetLedger> {
    pool: UniV3Pool,
    broker: Rc<RefCell<L>>,
    positions: BTreeMap<PositionInfo, Position>,
    status: Option<MarketStatus>,
    /// Tick the previous minute closed on, used for fee-range checks.
    last_close_tick: Option<i32>,
    external_prices: Option<HashMap<String, Decimal>>,
    actions: Vec<MarketAction>,
}

impl<L: AssetLedger> UniLpMarket<L> {
    #[must_use]
    pub fn new(pool: UniV3Pool, broker: Rc<RefCell<L>>) -> Self {
        Self {
            pool,
            broker,
            positions: BTreeMap::new(),
            status: None,
            last_close_tick: None,
            external_prices: None,
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &UniV3Pool {
        &self.pool
    }

    #[must_use]
    pub fn positions(&self) -> &BTreeMap<PositionInfo, Position> {
        &self.positions
    }

    /// Most recent snapshot, or an error when none has been replayed.
    pub fn market_status(&self) -> Result<&MarketStatus, BacktestError> {
        self.status
            .as_ref()
            .ok_or(BacktestError::NotConfigured("market status"))
    }

    fn timestamp(&self) -> Result<NaiveDateTime, BacktestError> {
        Ok(self.market_status()?.timestamp)
    }

    /// Sqrt price X96 at the current snapshot's close price.
    pub fn current_sqrt_price(&self) -> Result<U256, BacktestError> {
        let price = self.market_status()?.price;
        decimal_price_to_sqrt_price_x96(
            price,
            self.pool.token0.decimals,
            self.pool.token1.decimals,
            self.pool.is_token0_quote,
        )
    }

    /// Advances the market by one snapshot.
    ///
    /// The market's own positions add virtual liquidity on top of the
    /// observed pool liquidity, then each in-range position accrues its
    /// share of the minute's swap fees. Range membership is judged at
    /// the tick the previous minute closed on; the first snapshot ever
    /// replayed accrues nothing. Snapshots must arrive in strictly
    /// increasing timestamp order.
    pub fn set_market_status(
        &mut self,
        mut status: MarketStatus,
        external_prices: Option<HashMap<String, Decimal>>,
    ) -> Result<(), BacktestError> {
        if let Some(previous) = &self.status {
            if status.timestamp <= previous.timestamp {
                return Err(BacktestError::StatusOutOfOrder {
                    previous: previous.timestamp.to_string(),
                    current: status.timestamp.to_string(),
                });
            }
        }

        // Transferred positions still have their liquidity in the pool,
        // so they fold in and earn like any other.
        let own_liquidity: u128 = self.positions.values().map(|p| p.liquidity).sum();
        status.current_liquidity += Decimal::from_u128(own_liquidity)
            .ok_or(BacktestError::Overflow("own liquidity"))?;

        for (info, position) in self.positions.iter_mut() {
            core::update_fee(&self.pool, self.last_close_tick, &status, *info, position)?;
        }

        debug!(
            timestamp = %status.timestamp,
            tick = status.close_tick,
            price = %status.price,
            "market status updated"
        );
        self.last_close_tick = Some(status.close_tick);
        self.status = Some(status);
        self.external_prices = external_prices;
        Ok(())
    }

    /// Opens (or tops up) a position between two quote-unit prices,
    /// spending at most the given base and quote budgets. Budgets
    /// default to the full wallet balances.
    ///
    /// Returns the position key, the base and quote actually spent, and
    /// the liquidity minted.
    pub fn add_liquidity(
        &mut self,
        lower_quote_price: Decimal,
        upper_quote_price: Decimal,
        base_max_amount: Option<Decimal>,
        quote_max_amount: Option<Decimal>,
    ) -> Result<(PositionInfo, Decimal, Decimal, u128), BacktestError> {
        let info = core::quote_price_pair_to_ticks(&self.pool, lower_quote_price, upper_quote_price)?;
        self.add_liquidity_by_tick(
            info.lower_tick,
            info.upper_tick,
            base_max_amount,
            quote_max_amount,
            None,
        )
    }

    /// Tick-range variant of [`add_liquidity`](Self::add_liquidity).
    /// Reversed ticks are corrected, and an explicit sqrt price can
    /// override the snapshot price.
    pub fn add_liquidity_by_tick(
        &mut self,
        lower_tick: i32,
        upper_tick: i32,
        base_max_amount: Option<Decimal>,
        quote_max_amount: Option<Decimal>,
        sqrt_price_x96: Option<U256>,
    ) -> Result<(PositionInfo, Decimal, Decimal, u128), BacktestError> {
        let timestamp = self.timestamp()?;
        let info = PositionInfo::new(lower_tick, upper_tick)?;

        let base_max = match base_max_amount {
            Some(amount) => amount,
            None => self.broker.borrow().balance(self.pool.base_token()),
        };
        let quote_max = match quote_max_amount {
            Some(amount) => amount,
            None => self.broker.borrow().balance(self.pool.quote_token()),
        };
        let (token0_max, token1_max) = self.pool.convert_pair(base_max, quote_max);

        let sqrt_price = match sqrt_price_x96 {
            Some(sqrt) => sqrt,
            None => self.current_sqrt_price()?,
        };
        let (used0, used1, liquidity) =
            core::new_position(&self.pool, info, token0_max, token1_max, sqrt_price)?;

        {
            let mut broker = self.broker.borrow_mut();
            // Check both sides up front so a failure never leaves a
            // one-legged withdrawal behind.
            for (token, needed) in [(&self.pool.token0, used0), (&self.pool.token1, used1)] {
                let have = broker.balance(token);
                if have < needed {
                    return Err(BacktestError::InsufficientBalance {
                        token: token.name.clone(),
                        have: have.to_string(),
                        need: needed.to_string(),
                    });
                }
            }
            broker.withdraw(&self.pool.token0, used0)?;
            broker.withdraw(&self.pool.token1, used1)?;
        }

        self.positions
            .entry(info)
            .or_insert_with(|| Position::with_liquidity(0))
            .liquidity += liquidity;

        let (base_used, quote_used) = self.pool.convert_pair(used0, used1);
        debug!(%info, liquidity, %base_used, %quote_used, "liquidity added");
        self.actions.push(MarketAction::AddLiquidity {
            timestamp,
            position: info,
            base_amount_max: base_max,
            quote_amount_max: quote_max,
            base_amount_actual: base_used,
            quote_amount_actual: quote_used,
            liquidity,
        });
        Ok((info, base_used, quote_used, liquidity))
    }

    /// Burns liquidity (all of it by default) at the snapshot price and
    /// collects everything owed back into the wallet.
    ///
    /// Returns the base and quote that reached the wallet: the burn
    /// proceeds plus any previously accrued fees.
    pub fn remove_liquidity(
        &mut self,
        info: PositionInfo,
        liquidity: Option<u128>,
    ) -> Result<(Decimal, Decimal), BacktestError> {
        self.remove_liquidity_with(info, liquidity, true, None, true)
    }

    /// Full-control variant of [`remove_liquidity`](Self::remove_liquidity):
    /// optionally skip the collect, price the burn at an explicit sqrt
    /// price, or keep the emptied ledger entry around.
    ///
    /// Burning more than the position holds clamps to what is there.
    /// With `collect` the return is what the collect deposited; without
    /// it, the burn amounts now parked as pending.
    pub fn remove_liquidity_with(
        &mut self,
        info: PositionInfo,
        liquidity: Option<u128>,
        collect: bool,
        sqrt_price_x96: Option<U256>,
        remove_dry_position: bool,
    ) -> Result<(Decimal, Decimal), BacktestError> {
        let timestamp = self.timestamp()?;
        let sqrt_price = match sqrt_price_x96 {
            Some(sqrt) => sqrt,
            None => self.current_sqrt_price()?,
        };
        let position = self
            .positions
            .get_mut(&info)
            .ok_or(BacktestError::PositionNotFound(info.lower_tick, info.upper_tick))?;

        let burned = liquidity.unwrap_or(position.liquidity).min(position.liquidity);
        let (amount0, amount1) = core::close_position(&self.pool, info, burned, sqrt_price)?;
        position.liquidity -= burned;
        position.pending_amount0 += amount0;
        position.pending_amount1 += amount1;

        let (base_amount, quote_amount) = self.pool.convert_pair(amount0, amount1);
        debug!(%info, burned, %base_amount, %quote_amount, "liquidity removed");
        self.actions.push(MarketAction::RemoveLiquidity {
            timestamp,
            position: info,
            liquidity: burned,
            base_amount,
            quote_amount,
        });

        if collect {
            let (collected0, collected1) =
                self.collect_fee_with(info, None, None, remove_dry_position, true)?;
            return Ok(self.pool.convert_pair(collected0, collected1));
        }
        Ok((base_amount, quote_amount))
    }

    /// Collects everything pending on a position into the wallet and
    /// drops the entry if it ends up empty. Returns the base and quote
    /// collected.
    pub fn collect_fee(&mut self, info: PositionInfo) -> Result<(Decimal, Decimal), BacktestError> {
        let (amount0, amount1) = self.collect_fee_with(info, None, None, true, true)?;
        Ok(self.pool.convert_pair(amount0, amount1))
    }

    /// Collects up to the given token0/token1 maxima from a position's
    /// pending amounts. Returns the token0 and token1 collected.
    ///
    /// Negative maxima are rejected before any state changes; maxima
    /// above the pending amounts clamp silently. With `collect_to_user`
    /// false the amounts are forfeited instead of deposited.
    pub fn collect_fee_with(
        &mut self,
        info: PositionInfo,
        max_amount0: Option<Decimal>,
        max_amount1: Option<Decimal>,
        remove_dry_position: bool,
        collect_to_user: bool,
    ) -> Result<(Decimal, Decimal), BacktestError> {
        let timestamp = self.timestamp()?;
        for (name, max) in [("max_amount0", max_amount0), ("max_amount1", max_amount1)] {
            if let Some(max) = max {
                if max.is_sign_negative() {
                    return Err(BacktestError::InvalidInput {
                        what: name,
                        value: max.to_string(),
                    });
                }
            }
        }
        let position = self
            .positions
            .get_mut(&info)
            .ok_or(BacktestError::PositionNotFound(info.lower_tick, info.upper_tick))?;

        let amount0 = match max_amount0 {
            Some(max) => position.pending_amount0.min(max),
            None => position.pending_amount0,
        };
        let amount1 = match max_amount1 {
            Some(max) => position.pending_amount1.min(max),
            None => position.pending_amount1,
        };
        position.pending_amount0 -= amount0;
        position.pending_amount1 -= amount1;
        let dry = position.is_dry();

        if collect_to_user {
            let mut broker = self.broker.borrow_mut();
            broker.deposit(&self.pool.token0, amount0)?;
            broker.deposit(&self.pool.token1, amount1)?;
        }
        if remove_dry_position && dry {
            self.positions.remove(&info);
        }

        let (base_amount, quote_amount) = self.pool.convert_pair(amount0, amount1);
        self.actions.push(MarketAction::CollectFee {
            timestamp,
            position: info,
            base_amount,
            quote_amount,
        });
        Ok((amount0, amount1))
    }

    /// Burns every position the wallet still owns and collects the
    /// proceeds.
    pub fn remove_all_liquidity(&mut self) -> Result<(), BacktestError> {
        let keys: Vec<PositionInfo> = self
            .positions
            .iter()
            .filter(|(_, p)| !p.transferred)
            .map(|(info, _)| *info)
            .collect();
        for info in keys {
            self.remove_liquidity(info, None)?;
        }
        Ok(())
    }

    /// Exchanges `from_amount` of one pool token for the other at the
    /// given price (snapshot price by default), charging the pool fee
    /// on the input side. `price` is in units of `to_token` per
    /// `from_token`.
    ///
    /// Returns the fee charged and the amount received. A zero amount
    /// is a no-op.
    pub fn swap(
        &mut self,
        from_amount: Decimal,
        from_token: &TokenInfo,
        to_token: &TokenInfo,
        price: Option<Decimal>,
    ) -> Result<(Decimal, Decimal), BacktestError> {
        let timestamp = self.timestamp()?;
        for token in [from_token, to_token] {
            if !self.pool.contains(token) {
                return Err(BacktestError::TokenNotInPool(token.name.clone()));
            }
        }
        if from_token == to_token {
            return Err(BacktestError::InvalidInput {
                what: "swap pair",
                value: from_token.name.clone(),
            });
        }
        if from_amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "from_amount",
                value: from_amount.to_string(),
            });
        }
        if from_amount.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }

        let price = match price {
            Some(price) => price,
            None => {
                let market_price = self.market_status()?.price;
                if market_price <= Decimal::ZERO {
                    return Err(BacktestError::InvalidInput {
                        what: "status price",
                        value: market_price.to_string(),
                    });
                }
                if from_token == self.pool.base_token() {
                    market_price
                } else {
                    Decimal::ONE / market_price
                }
            }
        };
        let fee = from_amount * self.pool.fee_rate;
        let to_amount = (from_amount - fee) * price;

        {
            let mut broker = self.broker.borrow_mut();
            broker.withdraw(from_token, from_amount)?;
            broker.deposit(to_token, to_amount)?;
        }
        self.actions.push(MarketAction::Swap {
            timestamp,
            from_token: from_token.name.clone(),
            to_token: to_token.name.clone(),
            from_amount,
            fee,
            to_amount,
            price,
        });
        Ok((fee, to_amount))
    }

    /// Buys `amount` of base token with quote at the given price
    /// (snapshot price by default). The quote spent is grossed up by
    /// `1 / (1 - fee_rate)` so the fee is exactly `fee_rate` of it.
    ///
    /// Returns the fee, the quote spent including it, and the base
    /// received.
    pub fn buy(
        &mut self,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<(Decimal, Decimal, Decimal), BacktestError> {
        let timestamp = self.timestamp()?;
        if amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "amount",
                value: amount.to_string(),
            });
        }
        if amount.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
        }
        let price = match price {
            Some(price) => price,
            None => self.market_status()?.price,
        };
        let quote_spent = price * amount / (Decimal::ONE - self.pool.fee_rate);
        let fee = quote_spent * self.pool.fee_rate;

        let (base_after, quote_after) = {
            let mut broker = self.broker.borrow_mut();
            let quote_after = broker.withdraw(self.pool.quote_token(), quote_spent)?;
            let base_after = broker.deposit(self.pool.base_token(), amount)?;
            (base_after, quote_after)
        };
        self.actions.push(MarketAction::Buy {
            timestamp,
            amount,
            price,
            fee,
            base_balance_after: base_after,
            quote_balance_after: quote_after,
        });
        Ok((fee, quote_spent, amount))
    }

    /// Sells `amount` of base token for quote at the given price
    /// (snapshot price by default), with the pool fee taken out of the
    /// proceeds.
    ///
    /// Returns the fee, the base spent, and the quote received.
    pub fn sell(
        &mut self,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Result<(Decimal, Decimal, Decimal), BacktestError> {
        let timestamp = self.timestamp()?;
        if amount.is_sign_negative() {
            return Err(BacktestError::InvalidInput {
                what: "amount",
                value: amount.to_string(),
            });
        }
        if amount.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
        }
        let price = match price {
            Some(price) => price,
            None => self.market_status()?.price,
        };
        let quote_value = price * amount;
        let fee = quote_value * self.pool.fee_rate;
        let quote_got = quote_value - fee;

        let (base_after, quote_after) = {
            let mut broker = self.broker.borrow_mut();
            let base_after = broker.withdraw(self.pool.base_token(), amount)?;
            let quote_after = broker.deposit(self.pool.quote_token(), quote_got)?;
            (base_after, quote_after)
        };
        self.actions.push(MarketAction::Sell {
            timestamp,
            amount,
            price,
            fee,
            base_balance_after: base_after,
            quote_balance_after: quote_after,
        });
        Ok((fee, amount, quote_got))
    }

    /// Trades towards an equal split of wallet value between base and
    /// quote at the given price (snapshot price by default), accounting
    /// for the trade fee so the two sides land equal after it.
    pub fn even_rebalance(&mut self, price: Option<Decimal>) -> Result<(), BacktestError> {
        let price = match price {
            Some(price) => price,
            None => self.market_status()?.price,
        };
        if price <= Decimal::ZERO {
            return Err(BacktestError::InvalidInput {
                what: "price",
                value: price.to_string(),
            });
        }
        let (base_balance, quote_balance) = {
            let broker = self.broker.borrow();
            (
                broker.balance(self.pool.base_token()),
                broker.balance(self.pool.quote_token()),
            )
        };

        let base_value = base_balance * price;
        if quote_balance > base_value {
            let delta = (quote_balance / price - base_balance)
                * (Decimal::ONE - self.pool.fee_rate)
                / (Decimal::TWO - self.pool.fee_rate);
            if delta > Decimal::ZERO {
                self.buy(delta, Some(price))?;
            }
        } else if base_value > quote_balance {
            let delta =
                (base_balance - quote_balance / price) / (Decimal::TWO - self.pool.fee_rate);
            if delta > Decimal::ZERO {
                self.sell(delta, Some(price))?;
            }
        }
        Ok(())
    }

    /// Base and quote currently locked in a position at the snapshot
    /// price. Unknown keys report zeros rather than an error.
    pub fn get_position_amounts(
        &self,
        info: PositionInfo,
    ) -> Result<(Decimal, Decimal), BacktestError> {
        let Some(position) = self.positions.get(&info) else {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        };
        let sqrt_price = self.current_sqrt_price()?;
        let (amount0, amount1) =
            core::position_amounts(&self.pool, info, position.liquidity, sqrt_price)?;
        Ok(self.pool.convert_pair(amount0, amount1))
    }

    /// Values all non-transferred positions and their pending fees in
    /// quote units. Wallet balances are the broker's to report, so they
    /// stay out of the aggregate.
    ///
    /// Token prices come from `external_prices` (keyed by token name),
    /// falling back to the prices supplied with the snapshot, falling
    /// back to the pool's own price with the quote token at one. A
    /// price map that omits a pool token is an error.
    pub fn get_market_balance(
        &self,
        external_prices: Option<&HashMap<String, Decimal>>,
    ) -> Result<MarketBalance, BacktestError> {
        let status = self.market_status()?;
        let prices = external_prices.or(self.external_prices.as_ref());
        let (base_price, quote_price) = match prices {
            Some(map) => {
                let lookup = |token: &TokenInfo| {
                    map.get(&token.name)
                        .copied()
                        .ok_or_else(|| BacktestError::MissingExternalPrice(token.name.clone()))
                };
                (lookup(self.pool.base_token())?, lookup(self.pool.quote_token())?)
            }
            None => (status.price, Decimal::ONE),
        };

        let sqrt_price = self.current_sqrt_price()?;
        let mut base_in_position = Decimal::ZERO;
        let mut quote_in_position = Decimal::ZERO;
        let mut base_uncollected = Decimal::ZERO;
        let mut quote_uncollected = Decimal::ZERO;
        for (info, position) in &self.positions {
            if position.transferred {
                continue;
            }
            let (amount0, amount1) =
                core::position_amounts(&self.pool, *info, position.liquidity, sqrt_price)?;
            let (base, quote) = self.pool.convert_pair(amount0, amount1);
            base_in_position += base;
            quote_in_position += quote;
            let (base_fee, quote_fee) = self
                .pool
                .convert_pair(position.pending_amount0, position.pending_amount1);
            base_uncollected += base_fee;
            quote_uncollected += quote_fee;
        }

        let net_value = (base_in_position + base_uncollected) * base_price
            + (quote_in_position + quote_uncollected) * quote_price;

        Ok(MarketBalance {
            net_value,
            base_uncollected,
            quote_uncollected,
            base_in_position,
            quote_in_position,
            position_count: self.positions.values().filter(|p| !p.transferred).count(),
        })
    }

    /// Marks a position as moved out of the wallet (e.g. its NFT was
    /// sent away). It stops counting towards the market balance but
    /// keeps earning fees, since its liquidity is still in the pool;
    /// state is kept for a later transfer back.
    pub fn transfer_position_out(&mut self, info: PositionInfo) -> Result<(), BacktestError> {
        let position = self
            .positions
            .get_mut(&info)
            .ok_or(BacktestError::PositionNotFound(info.lower_tick, info.upper_tick))?;
        if position.transferred {
            return Err(BacktestError::AlreadyTransferred(info.lower_tick, info.upper_tick));
        }
        position.transferred = true;
        Ok(())
    }

    /// Reverses [`transfer_position_out`](Self::transfer_position_out).
    pub fn transfer_position_in(&mut self, info: PositionInfo) -> Result<(), BacktestError> {
        let position = self
            .positions
            .get_mut(&info)
            .ok_or(BacktestError::PositionNotFound(info.lower_tick, info.upper_tick))?;
        if !position.transferred {
            return Err(BacktestError::NotTransferred(info.lower_tick, info.upper_tick));
        }
        position.transferred = false;
        Ok(())
    }

    /// Quote-unit price at a tick boundary for this pool.
    pub fn tick_to_price(&self, tick: i32) -> Result<Decimal, BacktestError> {
        tick_to_decimal_price(
            tick,
            self.pool.token0.decimals,
            self.pool.token1.decimals,
            self.pool.is_token0_quote,
        )
    }

    /// Tick whose price interval contains the given quote-unit price.
    pub fn price_to_tick(&self, price: Decimal) -> Result<i32, BacktestError> {
        decimal_price_to_tick(
            price,
            self.pool.token0.decimals,
            self.pool.token1.decimals,
            self.pool.is_token0_quote,
        )
    }

    /// Verifies the market is ready to trade: a snapshot has been
    /// replayed and its price is usable.
    pub fn check_market(&self) -> Result<(), BacktestError> {
        let status = self.market_status()?;
        if status.price <= Decimal::ZERO {
            return Err(BacktestError::InvalidInput {
                what: "status price",
                value: status.price.to_string(),
            });
        }
        if self.pool.token0.name == self.pool.token1.name {
            return Err(BacktestError::NotConfigured("distinct pool tokens"));
        }
        Ok(())
    }

    /// Drains and returns the audit log accumulated so far.
    pub fn take_actions(&mut self) -> Vec<MarketAction> {
        std::mem::take(&mut self.actions)
    }

    #[must_use]
    pub fn actions(&self) -> &[MarketAction] {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn weth() -> TokenInfo {
        TokenInfo::new("WETH", 18)
    }

    fn usdc() -> TokenInfo {
        TokenInfo::new("USDC", 6)
    }

    fn pool() -> UniV3Pool {
        UniV3Pool::new(weth(), usdc(), dec!(0.003), false).unwrap()
    }

    fn status_at_minute(minute: u32, price: Decimal, tick: i32) -> MarketStatus {
        MarketStatus {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(minute / 60, minute % 60, 0)
                .unwrap(),
            close_tick: tick,
            current_liquidity: dec!(20000000000000000000),
            in_amount0: dec!(500000000000000000000),
            in_amount1: dec!(1000000000000),
            price,
        }
    }

    /// Market at 2000 USDC/WETH with 10 WETH and 20000 USDC in the
    /// wallet. Tick -200312 is the floor tick of that price.
    fn market() -> UniLpMarket<InMemoryBroker> {
        let broker = Rc::new(RefCell::new(InMemoryBroker::new()));
        broker.borrow_mut().set_balance(&weth(), dec!(10));
        broker.borrow_mut().set_balance(&usdc(), dec!(20000));
        let mut market = UniLpMarket::new(pool(), broker);
        market
            .set_market_status(status_at_minute(0, dec!(2000), -200_312), None)
            .unwrap();
        market
    }

    use crate::broker::InMemoryBroker;

    #[test]
    fn add_liquidity_stays_within_budget() {
        let mut market = market();
        let (info, base_used, quote_used, liquidity) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        assert!(liquidity > 0);
        assert!(base_used <= dec!(10));
        assert!(quote_used <= dec!(20000));
        assert!(base_used > Decimal::ZERO);
        assert!(quote_used > Decimal::ZERO);
        assert!(info.lower_tick < -200_312 && -200_312 < info.upper_tick);

        let broker = market.broker.clone();
        assert_eq!(broker.borrow().balance(&weth()), dec!(10) - base_used);
        assert_eq!(broker.borrow().balance(&usdc()), dec!(20000) - quote_used);
    }

    #[test]
    fn add_liquidity_defaults_to_full_balances() {
        let mut market = market();
        let (_, base_used, quote_used, _) =
            market.add_liquidity(dec!(1800), dec!(2200), None, None).unwrap();
        assert!(base_used <= dec!(10));
        assert!(quote_used <= dec!(20000));
        // At mid-range one side should be nearly exhausted.
        assert!(base_used > dec!(5) || quote_used > dec!(10000));
    }

    #[test]
    fn same_range_adds_merge_into_one_position() {
        let mut market = market();
        let (info_a, _, _, liq_a) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(2)), Some(dec!(4000)))
            .unwrap();
        let (info_b, _, _, liq_b) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(2)), Some(dec!(4000)))
            .unwrap();
        assert_eq!(info_a, info_b);
        assert_eq!(market.positions().len(), 1);
        assert_eq!(market.positions()[&info_a].liquidity, liq_a + liq_b);
    }

    #[test]
    fn reversed_ticks_are_corrected_on_add() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity_by_tick(-199_000, -201_000, Some(dec!(1)), Some(dec!(2000)), None)
            .unwrap();
        assert_eq!(info.lower_tick, -201_000);
        assert_eq!(info.upper_tick, -199_000);
    }

    #[test]
    fn remove_returns_no_more_than_deposited() {
        let mut market = market();
        let (info, base_used, quote_used, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        let (base_got, quote_got) = market.remove_liquidity(info, None).unwrap();
        assert!(base_got <= base_used);
        assert!(quote_got <= quote_used);
        // Round-down loses at most dust.
        assert!(base_used - base_got < dec!(0.000001));
        assert!(quote_used - quote_got < dec!(0.01));
    }

    #[test]
    fn remove_and_collect_deletes_dry_position() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market.remove_liquidity(info, None).unwrap();
        assert!(market.positions().is_empty());
        assert_eq!(
            market.get_position_amounts(info).unwrap(),
            (Decimal::ZERO, Decimal::ZERO)
        );
    }

    #[test]
    fn partial_remove_keeps_position() {
        let mut market = market();
        let (info, _, _, liquidity) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market.remove_liquidity(info, Some(liquidity / 2)).unwrap();
        assert_eq!(market.positions()[&info].liquidity, liquidity - liquidity / 2);
    }

    #[test]
    fn remove_with_collect_returns_accrued_fees_too() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market
            .set_market_status(status_at_minute(1, dec!(2000), -200_312), None)
            .unwrap();
        let pending0 = market.positions()[&info].pending_amount0;
        let pending1 = market.positions()[&info].pending_amount1;
        assert!(pending1 > Decimal::ZERO);
        let (in_base, in_quote) = market.get_position_amounts(info).unwrap();

        let (base_got, quote_got) = market.remove_liquidity(info, None).unwrap();
        assert!((base_got - (in_base + pending0)).abs() < dec!(0.0000000001));
        assert!((quote_got - (in_quote + pending1)).abs() < dec!(0.0000000001));
    }

    #[test]
    fn over_remove_clamps_to_position_liquidity() {
        let mut market = market();
        let (info, _, _, liquidity) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market.remove_liquidity(info, Some(liquidity * 2)).unwrap();
        assert!(market.positions().is_empty());
    }

    #[test]
    fn fees_accrue_only_in_range_and_monotonically() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();

        market
            .set_market_status(status_at_minute(1, dec!(2000), -200_312), None)
            .unwrap();
        let after_one = market.positions()[&info].pending_amount1;
        assert!(after_one > Decimal::ZERO);

        for minute in 2..=60 {
            market
                .set_market_status(status_at_minute(minute, dec!(2000), -200_312), None)
                .unwrap();
            assert!(market.positions()[&info].pending_amount1 >= after_one);
        }
        let after_sixty = market.positions()[&info].pending_amount1;
        assert!(after_sixty > after_one * dec!(50));
    }

    #[test]
    fn out_of_range_position_earns_nothing() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(2400), dec!(2600), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market
            .set_market_status(status_at_minute(1, dec!(2000), -200_312), None)
            .unwrap();
        assert!(market.positions()[&info].pending_amount0.is_zero());
        assert!(market.positions()[&info].pending_amount1.is_zero());
    }

    #[test]
    fn collect_fee_respects_maxima_and_rejects_negative() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market
            .set_market_status(status_at_minute(1, dec!(2000), -200_312), None)
            .unwrap();
        let pending1 = market.positions()[&info].pending_amount1;
        assert!(pending1 > Decimal::ZERO);

        assert!(
            market
                .collect_fee_with(info, Some(dec!(-1)), None, true, true)
                .is_err()
        );
        assert_eq!(market.positions()[&info].pending_amount1, pending1);

        let cap = pending1 / dec!(2);
        let (_, got1) = market
            .collect_fee_with(info, None, Some(cap), false, true)
            .unwrap();
        assert_eq!(got1, cap);
        assert_eq!(market.positions()[&info].pending_amount1, pending1 - cap);
    }

    #[test]
    fn status_must_be_strictly_increasing() {
        let mut market = market();
        let result = market.set_market_status(status_at_minute(0, dec!(2001), -200_300), None);
        assert!(matches!(result, Err(BacktestError::StatusOutOfOrder { .. })));
    }

    #[test]
    fn swap_charges_fee_on_input_side() {
        let broker = Rc::new(RefCell::new(InMemoryBroker::new()));
        broker.borrow_mut().set_balance(&weth(), dec!(100));
        let mut market = UniLpMarket::new(pool(), broker.clone());
        market
            .set_market_status(status_at_minute(0, dec!(2000), -200_312), None)
            .unwrap();

        let (fee, to_amount) = market
            .swap(dec!(100), &weth(), &usdc(), Some(dec!(2000)))
            .unwrap();
        assert_eq!(fee, dec!(0.3));
        assert_eq!(to_amount, dec!(199400));
        assert_eq!(broker.borrow().balance(&weth()), Decimal::ZERO);
        assert_eq!(broker.borrow().balance(&usdc()), dec!(199400));
    }

    #[test]
    fn swap_rejects_foreign_and_identical_tokens() {
        let mut market = market();
        let dai = TokenInfo::new("DAI", 18);
        assert!(market.swap(dec!(1), &dai, &usdc(), None).is_err());
        assert!(market.swap(dec!(1), &weth(), &weth(), None).is_err());
    }

    #[test]
    fn zero_amount_trades_are_no_ops() {
        let mut market = market();
        assert_eq!(
            market.swap(Decimal::ZERO, &weth(), &usdc(), None).unwrap(),
            (Decimal::ZERO, Decimal::ZERO)
        );
        assert_eq!(
            market.buy(Decimal::ZERO, None).unwrap(),
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        );
        assert_eq!(
            market.sell(Decimal::ZERO, None).unwrap(),
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        );
        assert!(market.actions().is_empty());
    }

    #[test]
    fn buy_grosses_up_quote_sell_takes_fee_out() {
        let mut market = market();
        let (fee, quote_spent, base_got) = market.buy(dec!(1), Some(dec!(2000))).unwrap();
        // The fee is the pool rate of the quote actually spent.
        assert_eq!(fee, quote_spent * dec!(0.003));
        assert!((quote_spent * dec!(0.997) - dec!(2000)).abs() < dec!(0.0000001));
        assert!(quote_spent > dec!(2006.018) && quote_spent < dec!(2006.019));
        assert_eq!(base_got, dec!(1));

        let (fee, base_spent, quote_got) = market.sell(dec!(1), Some(dec!(2000))).unwrap();
        assert_eq!(fee, dec!(6));
        assert_eq!(base_spent, dec!(1));
        assert_eq!(quote_got, dec!(1994));
    }

    #[test]
    fn even_rebalance_equalises_both_sides() {
        let broker = Rc::new(RefCell::new(InMemoryBroker::new()));
        broker.borrow_mut().set_balance(&weth(), dec!(10));
        broker.borrow_mut().set_balance(&usdc(), dec!(40000));
        let mut market = UniLpMarket::new(pool(), broker.clone());
        market
            .set_market_status(status_at_minute(0, dec!(2000), -200_312), None)
            .unwrap();

        market.even_rebalance(Some(dec!(2000))).unwrap();
        let base_value = broker.borrow().balance(&weth()) * dec!(2000);
        let quote_value = broker.borrow().balance(&usdc());
        assert!((base_value - quote_value).abs() < dec!(0.0001));

        // The mirrored direction sells instead.
        broker.borrow_mut().set_balance(&weth(), dec!(30));
        broker.borrow_mut().set_balance(&usdc(), dec!(10000));
        market.even_rebalance(Some(dec!(2000))).unwrap();
        let base_value = broker.borrow().balance(&weth()) * dec!(2000);
        let quote_value = broker.borrow().balance(&usdc());
        assert!((base_value - quote_value).abs() < dec!(0.0001));
    }

    #[test]
    fn market_balance_counts_positions_not_wallet() {
        let mut market = market();
        // Wallet funds alone are worthless to the market aggregate; the
        // broker values those.
        let before = market.get_market_balance(None).unwrap();
        assert_eq!(before.net_value, Decimal::ZERO);
        assert_eq!(before.position_count, 0);

        let (_, base_used, quote_used, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        let after = market.get_market_balance(None).unwrap();
        assert_eq!(after.position_count, 1);
        assert!(after.base_in_position > Decimal::ZERO);
        assert!(after.quote_in_position > Decimal::ZERO);
        // The position is worth what went into it, minus round-down
        // dust.
        let deposited = base_used * dec!(2000) + quote_used;
        assert!(after.net_value <= deposited);
        assert!(deposited - after.net_value < dec!(1));
    }

    #[test]
    fn market_balance_uses_external_prices_and_rejects_missing() {
        let mut market = market();
        market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        let mut prices = HashMap::new();
        prices.insert("WETH".to_string(), dec!(2100));
        prices.insert("USDC".to_string(), dec!(1));
        let balance = market.get_market_balance(Some(&prices)).unwrap();
        assert_eq!(
            balance.net_value,
            balance.base_in_position * dec!(2100) + balance.quote_in_position
        );

        prices.remove("WETH");
        let result = market.get_market_balance(Some(&prices));
        assert!(matches!(result, Err(BacktestError::MissingExternalPrice(_))));
    }

    #[test]
    fn transferred_positions_leave_the_balance_but_keep_earning() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        let held = market.get_market_balance(None).unwrap();
        assert_eq!(held.position_count, 1);

        market.transfer_position_out(info).unwrap();
        let away = market.get_market_balance(None).unwrap();
        assert!(away.net_value < held.net_value);
        assert_eq!(away.base_in_position, Decimal::ZERO);
        assert_eq!(away.position_count, 0);

        // The liquidity is still in the pool while the NFT is away, so
        // fees keep accruing.
        market
            .set_market_status(status_at_minute(1, dec!(2000), -200_312), None)
            .unwrap();
        assert!(market.positions()[&info].pending_amount1 > Decimal::ZERO);

        assert!(matches!(
            market.transfer_position_out(info),
            Err(BacktestError::AlreadyTransferred(_, _))
        ));
        market.transfer_position_in(info).unwrap();
        assert!(matches!(
            market.transfer_position_in(info),
            Err(BacktestError::NotTransferred(_, _))
        ));
        let back = market.get_market_balance(None).unwrap();
        assert_eq!(back.base_in_position, held.base_in_position);
        assert_eq!(back.position_count, 1);
    }

    #[test]
    fn remove_all_liquidity_clears_owned_positions() {
        let mut market = market();
        market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(4)), Some(dec!(8000)))
            .unwrap();
        market
            .add_liquidity(dec!(1900), dec!(2100), Some(dec!(4)), Some(dec!(8000)))
            .unwrap();
        assert_eq!(market.positions().len(), 2);
        market.remove_all_liquidity().unwrap();
        assert!(market.positions().is_empty());
    }

    #[test]
    fn price_tick_helpers_round_trip() {
        let market = market();
        let tick = market.price_to_tick(dec!(2000)).unwrap();
        assert_eq!(tick, -200_312);
        let price = market.tick_to_price(tick).unwrap();
        assert!(price <= dec!(2000));
        assert!(market.tick_to_price(tick + 1).unwrap() > dec!(2000));
    }

    #[test]
    fn operations_require_market_status() {
        let broker = Rc::new(RefCell::new(InMemoryBroker::new()));
        let mut market = UniLpMarket::new(pool(), broker);
        assert!(matches!(
            market.add_liquidity(dec!(1800), dec!(2200), None, None),
            Err(BacktestError::NotConfigured(_))
        ));
        assert!(market.check_market().is_err());
    }

    #[test]
    fn actions_record_the_full_trail() {
        let mut market = market();
        let (info, _, _, _) = market
            .add_liquidity(dec!(1800), dec!(2200), Some(dec!(10)), Some(dec!(20000)))
            .unwrap();
        market.remove_liquidity(info, None).unwrap();
        let actions = market.take_actions();
        assert!(matches!(actions[0], MarketAction::AddLiquidity { .. }));
        assert!(matches!(actions[1], MarketAction::RemoveLiquidity { .. }));
        assert!(matches!(actions[2], MarketAction::CollectFee { .. }));
        assert!(market.actions().is_empty());
    }
}

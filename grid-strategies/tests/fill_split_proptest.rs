//! P5: any sequence of fills that together equal an ACTIVE order's
//! initial size ends with the slot VIRTUAL (the spread-placeholder
//! state) regardless of how the total is split across events.

use grid_core::accountant::Accountant;
use grid_core::chain::ChainFillEvent;
use grid_core::core::GridId as Id;
use grid_core::engine::StrategyHooks;
use grid_core::state_machine::StateMachine;
use grid_core::{ChainOrderId, GridSlot, SlotState, SlotType};
use grid_strategies::rotation::RotationSizingParams;
use grid_strategies::{ActiveOrdersTarget, StrategyConfig, StrategyEngine};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn config() -> StrategyConfig {
    StrategyConfig {
        target_active_orders: ActiveOrdersTarget { buy: 1, sell: 1 },
        partial_dust_threshold_percent: dec!(5),
        grid_regeneration_percent: dec!(3),
        rms_percent: dec!(14.3),
        spread_margin_percent: dec!(1),
        market_fee_percent: dec!(0.1),
    }
}

fn sizing() -> RotationSizingParams {
    RotationSizingParams { weight_exp: 1.0, increment_percent: dec!(1), min_size: Decimal::ZERO, base_precision: 8 }
}

fn fill(history_id: u128, order_id: u128, amount: Decimal) -> ChainFillEvent {
    ChainFillEvent {
        history_id: ChainOrderId(history_id),
        order_id: ChainOrderId(order_id),
        pays_amount: amount,
        pays_asset: "base".to_string(),
        receives_amount: amount * dec!(100),
        receives_asset: "quote".to_string(),
        is_maker: true,
        block_num: 1,
        block_time_unix: 0,
    }
}

proptest! {
    /// Split a fixed total size across 1-6 fill events (in integer tenths
    /// to stay exact under `Decimal`) and check the slot always ends
    /// Virtual with no order_id once the pieces sum to the full size.
    #[test]
    fn any_split_of_the_full_size_ends_virtual(
        pieces in proptest::collection::vec(1u64..20u64, 1..6),
    ) {
        let total: u64 = pieces.iter().sum();
        let total_size = Decimal::from(total) / dec!(10);

        let mut sm = StateMachine::new();
        let mut accountant = Accountant::new(None);

        let mut slot = GridSlot::new_virtual(Id(1), SlotType::Sell, dec!(101), total_size);
        slot.state = SlotState::Active;
        slot.order_id = Some(ChainOrderId(1));
        slot.size = total_size;
        sm.load_initial_grid(vec![slot]);

        let mut engine = StrategyEngine::new(config(), sizing(), dec!(2));

        for (i, piece) in pieces.iter().enumerate() {
            let amount = Decimal::from(*piece) / dec!(10);
            let event = fill(i as u128 + 1, 1, amount);
            engine.on_fill(&mut sm, &mut accountant, &event);
        }

        let ended = sm.get(Id(1)).unwrap();
        prop_assert_eq!(ended.state, SlotState::Virtual);
        prop_assert!(ended.order_id.is_none());
        prop_assert_eq!(ended.size, Decimal::ZERO);
    }
}

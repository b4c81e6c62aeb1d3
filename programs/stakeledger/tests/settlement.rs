//! Stake/unstake/claim through the settlement engine

mod common;

use std::sync::Arc;

use common::*;
use solana_program::pubkey::Pubkey;
use stakeledger::math::{lamports_to_wad, WAD};
use stakeledger::{
    EngineConfig, ErrorClass, ExternalError, LedgerError, LedgerStore, PayoutFailure,
    SettlementOutcome, StackingMode, TxKind, TxStatus,
};

const BUDGET_SOL: u64 = 1_000;

fn funded(config: EngineConfig) -> Harness {
    let h = Harness::new(config);
    h.engine
        .initialize_pool(BUDGET_SOL * LAMPORTS_PER_SOL)
        .unwrap();
    h
}

#[tokio::test]
async fn test_reward_split_and_claim_scenario() {
    let h = funded(test_config());
    let alice = Pubkey::new_unique();
    let bob = Pubkey::new_unique();

    h.at(100);
    let receipt = h.stake("alice", alice, 100, "fee-a1").await;
    assert_eq!(
        receipt.outcome,
        SettlementOutcome::Settled {
            payout_signature: None
        }
    );

    // 1000 SOL × 100s / year
    h.at(200);
    let overview = h.engine.get_overview("alice").unwrap();
    assert_eq!(overview.claimable_lamports, 3_170_979);

    let alice_at_200 = overview.pending_rewards;
    h.stake("bob", bob, 300, "fee-b1").await;
    assert_eq!(h.pool().total_principal, 400);

    h.at(400);
    let alice_view = h.engine.get_overview("alice").unwrap();
    let bob_view = h.engine.get_overview("bob").unwrap();
    let alice_new = alice_view.pending_rewards - alice_at_200;
    // 1/4 vs 3/4 of emission since t=200
    assert_eq!(bob_view.pending_rewards, 3 * alice_new);

    let claim = h.claim("alice", "fee-a2").await;
    assert_eq!(claim.kind, TxKind::Claim);
    assert_eq!(claim.amount, 4_756_463);
    let signature = match &claim.outcome {
        SettlementOutcome::Settled {
            payout_signature: Some(sig),
        } => sig.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };

    let position = h.position("alice");
    assert!(position.pending_rewards < WAD);
    assert_eq!(position.total_claimed, lamports_to_wad(4_756_463).unwrap());
    assert_eq!(
        position.total_accrued,
        position.total_claimed + position.pending_rewards
    );

    let transfers = h.chain.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].recipient, alice);
    assert_eq!(transfers[0].amount, 4_756_463);
    assert_eq!(transfers[0].signature, signature);

    let entry = h.entry(claim.transaction_id);
    assert_eq!(entry.status, TxStatus::Settled);
    assert_eq!(entry.payout_signature, Some(signature));
    assert_eq!(entry.fee_lamports, 5_000);
}

#[tokio::test]
async fn test_idle_time_is_not_banked() {
    let h = funded(test_config());
    h.at(1_000);
    h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    h.at(5_000);
    h.unstake("alice", 100, "fee-2").await;
    let acc = h.pool().acc_reward_per_share;

    // Nobody staked for a long stretch
    h.at(1_000_000);
    h.stake("bob", Pubkey::new_unique(), 100, "fee-3").await;
    assert_eq!(h.pool().acc_reward_per_share, acc);
    assert_eq!(h.engine.get_overview("bob").unwrap().pending_rewards, 0);
}

#[tokio::test]
async fn test_failed_fee_verification_changes_nothing() {
    let h = funded(test_config());
    h.at(100);
    h.stake("alice", Pubkey::new_unique(), 10_000_000, "fee-1").await;

    h.at(500);
    let pool_before = borsh::to_vec(&h.pool()).unwrap();
    let position_before = borsh::to_vec(&h.position("alice")).unwrap();
    let entries_before = h.store.transaction_count();

    // Fee never paid
    let err = h.engine.unstake("alice", 4_000_000, "unpaid").await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::FeeVerification);
    assert_eq!(err.reason_code(), "FEE_VERIFICATION_FAILED");

    // Fee paid but below the 40 lamport quote
    h.chain.pay_fee_amount("underpaid", 39);
    let err = h.engine.unstake("alice", 4_000_000, "underpaid").await.unwrap_err();
    assert!(matches!(err, LedgerError::FeeVerification(_)));

    assert_eq!(borsh::to_vec(&h.pool()).unwrap(), pool_before);
    assert_eq!(borsh::to_vec(&h.position("alice")).unwrap(), position_before);
    assert_eq!(h.store.transaction_count(), entries_before);
    assert!(!h.store.fee_signature_used("unpaid").unwrap());
}

#[tokio::test]
async fn test_oracle_outage_rejects_before_side_effects() {
    let h = funded(test_config());
    h.oracle.fail();
    h.chain.pay_fee("fee-1");
    let err = h
        .engine
        .stake("alice", Pubkey::new_unique(), 100, "fee-1")
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "PRICE_UNAVAILABLE");
    assert_eq!(h.chain.verify_calls(), 0);
    assert_eq!(h.store.transaction_count(), 0);
}

#[tokio::test]
async fn test_payout_failure_reports_pending() {
    let h = funded(test_config());
    let wallet = Pubkey::new_unique();
    h.at(0);
    h.stake("alice", wallet, 1_000, "fee-1").await;

    h.at(86_400);
    h.chain
        .push_fault(TransferFault::Fail(ExternalError::Rejected("node busy".into())));
    let receipt = h.claim("alice", "fee-2").await;
    assert!(receipt.is_pending());
    assert_eq!(
        receipt.outcome,
        SettlementOutcome::PendingRecovery {
            reason: PayoutFailure::Rejected("node busy".into())
        }
    );
    assert!(receipt.user_message().contains("pending"));

    // Local balance already reflects the claim
    let position = h.position("alice");
    assert_eq!(position.total_claimed, lamports_to_wad(receipt.amount).unwrap());
    assert!(position.pending_rewards < WAD);

    let entry = h.entry(receipt.transaction_id);
    assert_eq!(entry.status, TxStatus::PayoutFailed);
    assert!(entry.applied);
    assert!(entry.payout_signature.is_none());
    assert_eq!(entry.payout_attempts, 1);
    assert_eq!(entry.fee_signature, "fee-2");
    assert_eq!(h.engine.get_overview("alice").unwrap().awaiting_settlement, 1);
}

#[tokio::test]
async fn test_payout_timeout_fails_closed() {
    let h = funded(test_config());
    h.stake("alice", Pubkey::new_unique(), 1_000, "fee-1").await;

    h.chain.push_fault(TransferFault::Hang);
    let receipt = h.unstake("alice", 400, "fee-2").await;
    assert_eq!(
        receipt.outcome,
        SettlementOutcome::PendingRecovery {
            reason: PayoutFailure::Timeout
        }
    );
    assert_eq!(h.position("alice").principal, 600);
    assert_eq!(h.pool().total_principal, 600);
    assert!(h.chain.transfers().is_empty());
}

#[tokio::test]
async fn test_insufficient_vault_liquidity_is_distinguished() {
    let h = funded(test_config());
    h.stake("alice", Pubkey::new_unique(), 1_000, "fee-1").await;
    h.at(86_400);
    h.chain.set_sol_balance(10);

    let receipt = h.claim("alice", "fee-2").await;
    match receipt.outcome {
        SettlementOutcome::PendingRecovery {
            reason: PayoutFailure::InsufficientVaultLiquidity { available, required },
        } => {
            assert_eq!(available, 10);
            assert_eq!(required, receipt.amount);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_validation_errors() {
    let config = EngineConfig {
        min_stake_amount: 1_000,
        lock_duration_seconds: 3_600,
        ..test_config()
    };
    let h = funded(config);
    let wallet = Pubkey::new_unique();

    let err = h.engine.stake("alice", wallet, 0, "fee-0").await.unwrap_err();
    assert_eq!(err, LedgerError::ZeroAmount);
    let err = h.engine.stake("", wallet, 10, "fee-0").await.unwrap_err();
    assert_eq!(err, LedgerError::InvalidUserId);

    h.chain.pay_fee("fee-small");
    let err = h.engine.stake("alice", wallet, 999, "fee-small").await.unwrap_err();
    assert_eq!(err, LedgerError::BelowMinimumStake { minimum: 1_000 });

    h.at(100);
    h.stake("alice", wallet, 1_000, "fee-1").await;
    // Resulting total counts toward the minimum
    h.stake("alice", wallet, 1, "fee-2").await;

    let err = h
        .engine
        .stake("alice", Pubkey::new_unique(), 10, "fee-3")
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::WalletMismatch);

    h.chain.pay_fee("fee-4");
    let err = h.engine.unstake("alice", 10, "fee-4").await.unwrap_err();
    assert_eq!(err, LedgerError::StakeLocked);

    h.at(100 + 3_600);
    let err = h.engine.unstake("alice", 5_000, "fee-4").await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientStakeBalance {
            requested: 5_000,
            available: 1_001
        }
    );
    h.unstake("alice", 1_001, "fee-4").await;
    assert_eq!(h.position("alice").principal, 0);

    let err = h.engine.unstake("nobody", 1, "fee-5").await.unwrap_err();
    assert_eq!(err, LedgerError::PositionNotFound("nobody".into()));
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[tokio::test]
async fn test_claim_with_nothing_pending() {
    let h = funded(test_config());
    h.at(100);
    h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    h.chain.pay_fee("fee-2");
    let err = h.engine.claim("alice", "fee-2").await.unwrap_err();
    assert_eq!(err, LedgerError::NothingToClaim);
    assert_eq!(h.chain.verify_calls(), 1);
}

#[tokio::test]
async fn test_fee_signature_is_single_use() {
    let h = funded(test_config());
    let wallet = Pubkey::new_unique();
    h.stake("alice", wallet, 100, "fee-1").await;
    let calls = h.chain.verify_calls();

    let err = h.engine.stake("alice", wallet, 100, "fee-1").await.unwrap_err();
    assert_eq!(err, LedgerError::FeeSignatureReused);
    // Rejected before asking the chain
    assert_eq!(h.chain.verify_calls(), calls);
    assert_eq!(h.position("alice").principal, 100);
}

#[tokio::test]
async fn test_operations_require_pool() {
    let h = Harness::new(test_config());
    h.chain.pay_fee("fee-1");
    let err = h
        .engine
        .stake("alice", Pubkey::new_unique(), 100, "fee-1")
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::NotInitialized);

    h.engine.initialize_pool(LAMPORTS_PER_SOL).unwrap();
    assert_eq!(
        h.engine.initialize_pool(LAMPORTS_PER_SOL).unwrap_err(),
        LedgerError::AlreadyInitialized
    );
}

#[tokio::test]
async fn test_fund_rewards_raises_budget() {
    let h = funded(test_config());
    h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    h.at(3_600);

    let before = h.engine.pool_overview().unwrap();
    let pool = h.engine.fund_rewards(500 * LAMPORTS_PER_SOL).await.unwrap();
    assert_eq!(
        pool.total_funded,
        lamports_to_wad(1_500 * LAMPORTS_PER_SOL).unwrap()
    );
    // Emission up to now was charged at the old budget
    assert_eq!(
        pool.reward_budget,
        before.reward_budget + lamports_to_wad(500 * LAMPORTS_PER_SOL).unwrap()
    );
    assert_eq!(pool.acc_reward_per_share, before.acc_reward_per_share);

    assert_eq!(
        h.engine.fund_rewards(0).await.unwrap_err(),
        LedgerError::ZeroAmount
    );
}

#[tokio::test]
async fn test_overview_does_not_write() {
    let config = EngineConfig {
        lock_duration_seconds: 600,
        ..test_config()
    };
    let h = funded(config);
    h.at(10);
    h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    let pool_before = borsh::to_vec(&h.pool()).unwrap();

    h.at(310);
    let overview = h.engine.get_overview("alice").unwrap();
    assert!(overview.pending_rewards > 0);
    assert_eq!(overview.unlock_time, Some(610));
    assert_eq!(overview.principal, 100);
    assert_eq!(overview.booster_multiplier, WAD);
    assert_eq!(borsh::to_vec(&h.pool()).unwrap(), pool_before);

    let pool_view = h.engine.pool_overview().unwrap();
    assert_eq!(pool_view.total_principal, 100);
    assert!(pool_view.daily_emission_lamports > 0);
}

#[tokio::test]
async fn test_multiplicative_boosters() {
    let h = funded(test_config());
    let wallet = Pubkey::new_unique();
    h.boosters.set(
        wallet,
        vec![booster("random1/1", 3 * WAD / 2), booster("legendary", 2 * WAD)],
    );
    h.stake("alice", wallet, 1_000, "fee-1").await;

    let position = h.position("alice");
    assert_eq!(position.booster_multiplier, 3 * WAD);
    assert_eq!(position.shares, 3_000);
    assert_eq!(position.active_boosters.len(), 2);
    assert_eq!(h.pool().total_shares, 3_000);
    assert_eq!(h.pool().total_principal, 1_000);
}

#[tokio::test]
async fn test_max_tier_boosters_split_rewards() {
    let config = EngineConfig {
        stacking_mode: StackingMode::MaxTier,
        ..test_config()
    };
    let h = funded(config);
    let boosted = Pubkey::new_unique();
    h.boosters.set(
        boosted,
        vec![booster("random1/1", 3 * WAD / 2), booster("legendary", 2 * WAD)],
    );

    h.at(0);
    h.stake("alice", boosted, 1_000, "fee-1").await;
    h.stake("bob", Pubkey::new_unique(), 1_000, "fee-2").await;
    assert_eq!(h.position("alice").booster_multiplier, 2 * WAD);

    h.at(86_400);
    let alice = h.engine.get_overview("alice").unwrap().pending_rewards;
    let bob = h.engine.get_overview("bob").unwrap().pending_rewards;
    assert!(bob > 0);
    assert_eq!(alice, 2 * bob);
}

#[tokio::test]
async fn test_booster_cache_ttl_and_resolver_failure() {
    let config = EngineConfig {
        booster_cache_ttl_seconds: 1_000,
        ..test_config()
    };
    let h = funded(config);
    let wallet = Pubkey::new_unique();
    h.boosters.set(wallet, vec![booster("legendary", 2 * WAD)]);

    h.at(10);
    h.stake("alice", wallet, 100, "fee-1").await;
    h.at(500);
    h.stake("alice", wallet, 100, "fee-2").await;
    assert_eq!(h.boosters.calls(), 1);

    // Stale cache, registry down: keep the cached multiplier
    h.boosters.set_failing(true);
    h.at(2_000);
    h.stake("alice", wallet, 100, "fee-3").await;
    assert_eq!(h.boosters.calls(), 2);
    let position = h.position("alice");
    assert_eq!(position.booster_multiplier, 2 * WAD);
    assert_eq!(position.shares, 600);

    // Forced refresh surfaces the failure
    let err = h.engine.refresh_boosters("alice").await.unwrap_err();
    assert_eq!(err.reason_code(), "BOOSTER_UNAVAILABLE");
}

#[tokio::test]
async fn test_refresh_boosters_settles_first() {
    let h = funded(test_config());
    let wallet = Pubkey::new_unique();
    h.at(0);
    h.stake("alice", wallet, 1_000, "fee-1").await;

    h.at(86_400);
    let earned = h.engine.get_overview("alice").unwrap().pending_rewards;
    h.boosters.set(wallet, vec![booster("legendary", 2 * WAD)]);
    let position = h.engine.refresh_boosters("alice").await.unwrap();

    assert_eq!(position.pending_rewards, earned);
    assert_eq!(position.shares, 2_000);
    assert_eq!(h.pool().total_shares, 2_000);
    assert_eq!(h.pool().total_principal, 1_000);
}

#[tokio::test]
async fn test_commit_conflicts_are_retried() {
    let store = Arc::new(ContendedStore::default());
    let h = Harness::with_store(Arc::clone(&store), test_config());
    h.engine.initialize_pool(LAMPORTS_PER_SOL).unwrap();

    store.inject_conflicts(3);
    let receipt = h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    assert!(!receipt.is_pending());
    assert_eq!(store.commit_attempts(), 4);
    assert_eq!(h.position("alice").principal, 100);
}

#[tokio::test]
async fn test_exhausted_retries_are_recorded() {
    let store = Arc::new(ContendedStore::default());
    let h = Harness::with_store(Arc::clone(&store), test_config());
    h.engine.initialize_pool(LAMPORTS_PER_SOL).unwrap();

    store.inject_conflicts(100);
    let receipt = h.stake("alice", Pubkey::new_unique(), 100, "fee-1").await;
    match &receipt.outcome {
        SettlementOutcome::PendingRecovery {
            reason: PayoutFailure::LocalCommitFailed(_),
        } => {}
        other => panic!("unexpected outcome {:?}", other),
    }

    // The collected fee is on record even though nothing was applied
    let entry = h.entry(receipt.transaction_id);
    assert_eq!(entry.status, TxStatus::PayoutFailed);
    assert!(!entry.applied);
    assert!(store.load_position("alice").unwrap().is_none());
    assert_eq!(h.pool().total_principal, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stakers_keep_pool_consistent() {
    let config = EngineConfig {
        max_commit_retries: 20,
        ..test_config()
    };
    let h = Arc::new(funded(config));

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let wallet = Pubkey::new_unique();
            let user = format!("user-{}", i);
            for j in 0..3u64 {
                let sig = format!("fee-{}-{}", i, j);
                h.stake(&user, wallet, 10 * (i + 1), &sig).await;
            }
        }));
    }
    // Same user from several tasks at once
    for j in 0..4u64 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            let sig = format!("fee-shared-{}", j);
            h.stake("shared", Pubkey::default(), 25, &sig).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let expected: u128 = (1..=8u128).map(|i| 30 * i).sum::<u128>() + 100;
    assert_eq!(h.pool().total_principal, expected);
    assert_eq!(h.position("shared").principal, 100);
    assert_eq!(h.store.transaction_count(), 28);
}

#[tokio::test]
async fn test_share_change_closes_unemitted_window() {
    // 1 lamport a year is too little to move the accumulator within a second
    let h = Harness::new(test_config());
    h.engine.initialize_pool(1).unwrap();

    h.stake("alice", Pubkey::new_unique(), 100_000_000_000, "fee-a").await;
    let before = h.pool();
    assert_eq!(before.last_update_time, 0);

    h.at(1);
    h.stake("bob", Pubkey::new_unique(), 1, "fee-b").await;
    let pool = h.pool();
    // Alice's second alone is never credited at the shared distribution
    assert_eq!(pool.last_update_time, 1);
    assert_eq!(pool.acc_reward_per_share, 0);
    assert_eq!(pool.reward_budget, before.reward_budget);
    assert_eq!(pool.total_shares, before.total_shares + 1);
}

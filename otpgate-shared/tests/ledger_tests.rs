/// Ledger invariants against a real database
///
/// Run with `DATABASE_URL=... cargo test -p otpgate-shared -- --ignored`.

use chrono::{Duration, Utc};
use otpgate_shared::{
    auth::tokens::generate_login_hash,
    credits::{fold_balance, CreditLedger, LedgerError, TrialPolicy},
    db::{
        migrations::run_migrations,
        pool::{create_pool, DatabaseConfig},
    },
    models::{
        credit::{reasons, CreditTransaction},
        login_request::LoginRequest,
        organization::Organization,
        payment::{CreatePayment, Payment, PaymentStatus},
        user::{CreateUser, User, UserRole},
    },
};
use sqlx::PgPool;
use uuid::Uuid;

async fn setup() -> PgPool {
    let pool = create_pool(DatabaseConfig {
        url: std::env::var("DATABASE_URL").unwrap(),
        max_connections: 20,
        min_connections: 0,
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

fn random_phone() -> String {
    format!("+97256{:07}", Uuid::new_v4().as_u128() % 10_000_000)
}

async fn user_with_welcome(pool: &PgPool, ledger: &CreditLedger) -> User {
    let mut tx = pool.begin().await.unwrap();
    let user = User::create(
        &mut *tx,
        CreateUser {
            phone: Some(random_phone()),
            email: None,
            name: None,
            password_hash: None,
            role: UserRole::User,
        },
    )
    .await
    .unwrap();
    ledger.grant_welcome(&mut tx, user.id).await.unwrap();
    tx.commit().await.unwrap();
    user
}

#[tokio::test]
#[ignore]
async fn test_concurrent_debits_never_overdraw() {
    let pool = setup().await;
    let ledger = CreditLedger::new(
        pool.clone(),
        TrialPolicy {
            welcome_credits: 3,
            inactivity_days: 90,
        },
    );
    let user = user_with_welcome(&pool, &ledger).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.debit_user(user.id, reasons::USAGE).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::TrialBlocked(_)) | Err(LedgerError::InsufficientCredits { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(ledger.balance(user.id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_dropped_reservation_writes_nothing() {
    let pool = setup().await;
    let ledger = CreditLedger::new(
        pool.clone(),
        TrialPolicy {
            welcome_credits: 1,
            inactivity_days: 90,
        },
    );
    let user = user_with_welcome(&pool, &ledger).await;

    let reservation = ledger.reserve_debit(user.id).await.unwrap();
    assert_eq!(reservation.balance(), 1);

    // A second spend waits on the row lock until the first one resolves
    let waiting = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.debit_user(user.id, reasons::USAGE).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    drop(reservation);

    assert_eq!(waiting.await.unwrap().unwrap(), 0);
    assert_eq!(ledger.balance(user.id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_committed_reservation_debits_once() {
    let pool = setup().await;
    let ledger = CreditLedger::new(pool.clone(), TrialPolicy::default());
    let user = user_with_welcome(&pool, &ledger).await;

    let reservation = ledger.reserve_debit(user.id).await.unwrap();
    assert_eq!(reservation.commit(reasons::OTP_SEND).await.unwrap(), 9);
    assert_eq!(ledger.balance(user.id).await.unwrap(), 9);
}

#[tokio::test]
#[ignore]
async fn test_balance_matches_history() {
    let pool = setup().await;
    let ledger = CreditLedger::new(pool.clone(), TrialPolicy::default());
    let user = user_with_welcome(&pool, &ledger).await;

    ledger.grant(user.id, 5, reasons::ADMIN_GRANT).await.unwrap();
    ledger.debit_user(user.id, reasons::USAGE).await.unwrap();
    ledger.debit_user(user.id, reasons::OTP_SEND).await.unwrap();

    let rows = CreditTransaction::list_for_user(&pool, user.id, 100).await.unwrap();
    let folded = fold_balance(rows.iter().filter_map(|r| r.get_type().map(|t| (t, r.amount))));

    assert_eq!(folded, 13);
    assert_eq!(ledger.balance(user.id).await.unwrap(), 13);
}

#[tokio::test]
#[ignore]
async fn test_payment_lifts_trial_gate() {
    let pool = setup().await;
    let ledger = CreditLedger::new(
        pool.clone(),
        TrialPolicy {
            welcome_credits: 1,
            inactivity_days: 90,
        },
    );
    let user = user_with_welcome(&pool, &ledger).await;

    ledger.debit_user(user.id, reasons::USAGE).await.unwrap();
    assert!(ledger.trial_status(user.id).await.unwrap().blocked);

    let payment = Payment::create(
        &pool,
        CreatePayment {
            user_id: user.id,
            amount_cents: 500,
            currency: "USD".to_string(),
            credits: 50,
            provider_reference: None,
        },
    )
    .await
    .unwrap();

    let settled = ledger.complete_payment(payment.id).await.unwrap().unwrap();
    assert_eq!(settled.get_status(), Some(PaymentStatus::Success));

    // Only pending payments transition
    assert!(ledger.complete_payment(payment.id).await.unwrap().is_none());

    let status = ledger.trial_status(user.id).await.unwrap();
    assert!(!status.blocked);
    assert_eq!(status.successful_payments, 1);
    assert_eq!(ledger.balance(user.id).await.unwrap(), 50);
}

#[tokio::test]
#[ignore]
async fn test_organization_charged_once_under_concurrency() {
    let pool = setup().await;
    let ledger = CreditLedger::new(pool.clone(), TrialPolicy::default());
    let owner = user_with_welcome(&pool, &ledger).await;

    let mut conn = pool.acquire().await.unwrap();
    let org = Organization::create(&mut conn, "Concurrent", owner.id).await.unwrap();
    drop(conn);
    ledger.grant_organization(org.id, 10, reasons::ADMIN_GRANT).await.unwrap();

    let hash = generate_login_hash();
    let request = LoginRequest::create(
        &pool,
        &random_phone(),
        &hash,
        "qr",
        Utc::now() + Duration::minutes(5),
    )
    .await
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            let (org_id, request_id) = (org.id, request.id);
            tokio::spawn(async move { ledger.charge_organization_once(org_id, request_id, None).await })
        })
        .collect();

    let mut charged = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().charged {
            charged += 1;
        }
    }

    assert_eq!(charged, 1);

    let again = ledger.charge_organization_once(org.id, request.id, None).await.unwrap();
    assert!(!again.charged);
    assert_eq!(again.balance, 9);
}

#[tokio::test]
#[ignore]
async fn test_organization_without_credits_is_not_charged() {
    let pool = setup().await;
    let ledger = CreditLedger::new(pool.clone(), TrialPolicy::default());
    let owner = user_with_welcome(&pool, &ledger).await;

    let mut conn = pool.acquire().await.unwrap();
    let org = Organization::create(&mut conn, "Broke", owner.id).await.unwrap();
    drop(conn);

    let request = LoginRequest::create(
        &pool,
        &random_phone(),
        &generate_login_hash(),
        "qr",
        Utc::now() + Duration::minutes(5),
    )
    .await
    .unwrap();

    let result = ledger.charge_organization_once(org.id, request.id, None).await;
    assert!(matches!(result, Err(LedgerError::InsufficientCredits { balance: 0 })));

    // The usage row was rolled back, so a later charge can still happen
    ledger.grant_organization(org.id, 1, reasons::ADMIN_GRANT).await.unwrap();
    let charge = ledger.charge_organization_once(org.id, request.id, None).await.unwrap();
    assert!(charge.charged);
    assert_eq!(charge.balance, 0);
}

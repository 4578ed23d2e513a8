/// Credit ledger and trial gating
///
/// Every user starts with a welcome grant on the personal ledger. Until the
/// user makes a successful payment, they are on trial and get blocked when
/// either:
///
/// - the trial credits are gone (`balance <= 0`), or
/// - they have been inactive for `inactivity_days` or longer.
///
/// Last activity is the latest of account creation, most recent session
/// issuance and most recent debit.
///
/// # Concurrency
///
/// Debits run in a transaction that first locks the user row
/// (`SELECT … FOR UPDATE`), so two concurrent debits can never both pass the
/// balance check against the same remaining credit.
///
/// A debit that pays for an external side effect is taken in two steps:
/// [`CreditLedger::reserve_debit`] locks and checks, the caller does its work
/// on [`DebitReservation::conn`], and [`DebitReservation::commit`] writes the
/// debit. Dropping the reservation rolls all of it back.
///
/// # Example
///
/// ```no_run
/// use otpgate_shared::credits::{CreditLedger, TrialPolicy};
/// use otpgate_shared::models::credit::reasons;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = CreditLedger::new(pool, TrialPolicy::default());
///
/// let status = ledger.trial_status(user_id).await?;
/// if !status.blocked {
///     let balance = ledger.debit_user(user_id, reasons::USAGE).await?;
///     println!("remaining: {}", balance);
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::credit::{reasons, CreditTransaction, OrgCreditTransaction, TransactionType};
use crate::models::org_usage::OrgUsage;
use crate::models::organization::Organization;
use crate::models::payment::{Payment, PaymentStatus};
use crate::models::session::Session;
use crate::models::user::User;

/// Ledger operation failure
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Trial user is gated
    #[error("Trial access blocked: {}", .0.as_str())]
    TrialBlocked(BlockReason),

    /// Not enough credits for the debit
    #[error("Insufficient credits (balance {balance})")]
    InsufficientCredits { balance: i64 },

    /// Account is blocked by an admin
    #[error("User is blocked")]
    UserBlocked,

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Why a trial user is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    TrialCreditsExhausted,
    Inactive,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::TrialCreditsExhausted => "trial_credits_exhausted",
            BlockReason::Inactive => "inactive",
        }
    }
}

/// Trial parameters
#[derive(Debug, Clone, Copy)]
pub struct TrialPolicy {
    /// Credits granted on account creation
    pub welcome_credits: i32,

    /// Days without activity after which a trial user is blocked
    pub inactivity_days: i64,
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            welcome_credits: 10,
            inactivity_days: 90,
        }
    }
}

/// Facts the trial gate is evaluated on
#[derive(Debug, Clone, Copy)]
pub struct TrialInputs {
    pub balance: i64,
    pub successful_payments: i64,
    pub user_created_at: DateTime<Utc>,
    pub last_session_at: Option<DateTime<Utc>>,
    pub last_debit_at: Option<DateTime<Utc>>,
}

impl TrialInputs {
    /// Latest of creation, session issuance and debit
    pub fn last_activity(&self) -> DateTime<Utc> {
        [self.last_session_at, self.last_debit_at]
            .into_iter()
            .flatten()
            .fold(self.user_created_at, |latest, at| latest.max(at))
    }
}

/// Trial gate outcome
#[derive(Debug, Clone, Serialize)]
pub struct TrialStatus {
    pub blocked: bool,
    pub reason: Option<BlockReason>,
    pub successful_payments: i64,
    pub remaining_trial_credits: i64,
    pub last_activity_at: DateTime<Utc>,
}

impl TrialPolicy {
    /// Evaluates the trial gate at `now`
    ///
    /// `blocked = payments == 0 && (balance <= 0 || now - last_activity >= inactivity)`
    pub fn evaluate(&self, inputs: &TrialInputs, now: DateTime<Utc>) -> TrialStatus {
        let last_activity_at = inputs.last_activity();

        let reason = if inputs.successful_payments > 0 {
            None
        } else if inputs.balance <= 0 {
            Some(BlockReason::TrialCreditsExhausted)
        } else if now - last_activity_at >= Duration::days(self.inactivity_days) {
            Some(BlockReason::Inactive)
        } else {
            None
        };

        TrialStatus {
            blocked: reason.is_some(),
            reason,
            successful_payments: inputs.successful_payments,
            remaining_trial_credits: inputs.balance,
            last_activity_at,
        }
    }
}

/// Folds ledger rows into a balance
///
/// Mirrors the SQL aggregate; used where rows are already loaded.
pub fn fold_balance<I>(rows: I) -> i64
where
    I: IntoIterator<Item = (TransactionType, i32)>,
{
    rows.into_iter().fold(0i64, |acc, (tx_type, amount)| match tx_type {
        TransactionType::Credit => acc + amount as i64,
        TransactionType::Debit => acc - amount as i64,
    })
}

/// Outcome of charging an organization for a verified login request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrgCharge {
    /// False when this request was already charged to the organization
    pub charged: bool,
    pub balance: i64,
}

/// Ledger service for users and organizations
#[derive(Clone)]
pub struct CreditLedger {
    db: PgPool,
    policy: TrialPolicy,
}

impl CreditLedger {
    pub fn new(db: PgPool, policy: TrialPolicy) -> Self {
        CreditLedger { db, policy }
    }

    pub fn policy(&self) -> TrialPolicy {
        self.policy
    }

    /// Current balance
    pub async fn balance(&self, user_id: Uuid) -> Result<i64, LedgerError> {
        Ok(CreditTransaction::balance(&self.db, user_id).await?)
    }

    /// Trial gate evaluated now
    pub async fn trial_status(&self, user_id: Uuid) -> Result<TrialStatus, LedgerError> {
        let mut conn = self.db.acquire().await?;
        let user = User::find_by_id(&mut *conn, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        let inputs = Self::load_inputs(&mut conn, &user).await?;
        Ok(self.policy.evaluate(&inputs, Utc::now()))
    }

    async fn load_inputs(
        conn: &mut PgConnection,
        user: &User,
    ) -> Result<TrialInputs, sqlx::Error> {
        Ok(TrialInputs {
            balance: CreditTransaction::balance(&mut *conn, user.id).await?,
            successful_payments: Payment::count_successful(&mut *conn, user.id).await?,
            user_created_at: user.created_at,
            last_session_at: Session::latest_created_at(&mut *conn, user.id).await?,
            last_debit_at: CreditTransaction::latest_debit_at(&mut *conn, user.id).await?,
        })
    }

    fn check_spend(&self, user: &User, inputs: &TrialInputs) -> Result<TrialStatus, LedgerError> {
        if user.is_blocked {
            return Err(LedgerError::UserBlocked);
        }

        let status = self.policy.evaluate(inputs, Utc::now());
        if let Some(reason) = status.reason {
            return Err(LedgerError::TrialBlocked(reason));
        }

        if inputs.balance <= 0 {
            return Err(LedgerError::InsufficientCredits {
                balance: inputs.balance,
            });
        }

        Ok(status)
    }

    /// Debits one credit under a row lock and returns the new balance
    ///
    /// # Errors
    ///
    /// `TrialBlocked`, `InsufficientCredits` or `UserBlocked` when the debit
    /// is not allowed; nothing is written in that case.
    pub async fn debit_user(&self, user_id: Uuid, reason: &str) -> Result<i64, LedgerError> {
        self.reserve_debit(user_id).await?.commit(reason).await
    }

    /// Locks the user row and checks that one credit may be spent
    ///
    /// The lock is held until the returned reservation is committed or
    /// dropped, so concurrent spends by the same user queue behind it.
    ///
    /// # Errors
    ///
    /// Same as [`CreditLedger::debit_user`].
    pub async fn reserve_debit(&self, user_id: Uuid) -> Result<DebitReservation, LedgerError> {
        let mut tx = self.db.begin().await?;

        let user = User::lock_for_update(&mut tx, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        let inputs = Self::load_inputs(&mut tx, &user).await?;
        self.check_spend(&user, &inputs)?;

        Ok(DebitReservation {
            tx,
            user_id,
            balance: inputs.balance,
        })
    }

    /// Grants credits to a user
    pub async fn grant(&self, user_id: Uuid, amount: i32, reason: &str) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.db.begin().await?;
        User::lock_for_update(&mut tx, user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        CreditTransaction::append(&mut *tx, user_id, TransactionType::Credit, amount, reason)
            .await?;
        let balance = CreditTransaction::balance(&mut *tx, user_id).await?;
        tx.commit().await?;

        info!(user_id = %user_id, amount = amount, reason = reason, "Granted credits");
        Ok(balance)
    }

    /// Writes the welcome grant inside the caller's transaction
    pub async fn grant_welcome(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        if self.policy.welcome_credits <= 0 {
            return Ok(());
        }

        CreditTransaction::append(
            conn,
            user_id,
            TransactionType::Credit,
            self.policy.welcome_credits,
            reasons::WELCOME_BONUS,
        )
        .await?;

        info!(
            user_id = %user_id,
            credits = self.policy.welcome_credits,
            "Granted welcome credits"
        );
        Ok(())
    }
}

/// One credit held under the user row lock
///
/// Writes made through [`DebitReservation::conn`] land in the same
/// transaction as the debit.
pub struct DebitReservation {
    tx: Transaction<'static, Postgres>,
    user_id: Uuid,
    balance: i64,
}

impl DebitReservation {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Balance before the debit
    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// Appends the debit, commits, and returns the new balance
    pub async fn commit(mut self, reason: &str) -> Result<i64, LedgerError> {
        CreditTransaction::append(&mut *self.tx, self.user_id, TransactionType::Debit, 1, reason)
            .await?;
        self.tx.commit().await?;

        let balance = self.balance - 1;
        debug!(user_id = %self.user_id, reason = reason, balance = balance, "Debited credit");
        Ok(balance)
    }
}

impl CreditLedger {
    /// Settles a pending payment as successful and credits the user
    ///
    /// Both writes happen in one transaction. Returns `None` when the payment
    /// does not exist or is no longer pending.
    pub async fn complete_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, LedgerError> {
        let mut tx = self.db.begin().await?;

        let Some(payment) = Payment::settle(&mut *tx, payment_id, PaymentStatus::Success).await?
        else {
            return Ok(None);
        };

        CreditTransaction::append(
            &mut *tx,
            payment.user_id,
            TransactionType::Credit,
            payment.credits,
            reasons::PAYMENT,
        )
        .await?;
        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            user_id = %payment.user_id,
            credits = payment.credits,
            "Payment completed"
        );
        Ok(Some(payment))
    }

    /// Charges an organization once per verified login request
    ///
    /// The organization row is locked, then usage is recorded with
    /// `ON CONFLICT DO NOTHING`. Only the caller that inserted the usage row
    /// debits; everyone else sees `charged: false`.
    ///
    /// # Errors
    ///
    /// `InsufficientCredits` when the organization balance is not positive;
    /// the usage row is rolled back so a later call can charge.
    pub async fn charge_organization_once(
        &self,
        organization_id: Uuid,
        login_request_id: Uuid,
        api_token_id: Option<Uuid>,
    ) -> Result<OrgCharge, LedgerError> {
        let mut tx = self.db.begin().await?;

        Organization::lock_for_update(&mut tx, organization_id)
            .await?
            .ok_or(LedgerError::OrganizationNotFound(organization_id))?;

        let recorded =
            OrgUsage::record_once(&mut tx, organization_id, login_request_id, api_token_id).await?;
        let balance = OrgCreditTransaction::balance(&mut *tx, organization_id).await?;

        if recorded.is_none() {
            debug!(
                organization_id = %organization_id,
                login_request_id = %login_request_id,
                "Login request already charged"
            );
            return Ok(OrgCharge {
                charged: false,
                balance,
            });
        }

        if balance <= 0 {
            return Err(LedgerError::InsufficientCredits { balance });
        }

        OrgCreditTransaction::append(
            &mut *tx,
            organization_id,
            TransactionType::Debit,
            1,
            reasons::HASH_VALIDATION,
            Some(login_request_id),
        )
        .await?;
        tx.commit().await?;

        info!(
            organization_id = %organization_id,
            login_request_id = %login_request_id,
            "Charged organization for verification"
        );
        Ok(OrgCharge {
            charged: true,
            balance: balance - 1,
        })
    }

    /// Grants credits to an organization
    pub async fn grant_organization(
        &self,
        organization_id: Uuid,
        amount: i32,
        reason: &str,
    ) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.db.begin().await?;
        Organization::lock_for_update(&mut tx, organization_id)
            .await?
            .ok_or(LedgerError::OrganizationNotFound(organization_id))?;

        OrgCreditTransaction::append(
            &mut *tx,
            organization_id,
            TransactionType::Credit,
            amount,
            reason,
            None,
        )
        .await?;
        let balance = OrgCreditTransaction::balance(&mut *tx, organization_id).await?;
        tx.commit().await?;

        info!(organization_id = %organization_id, amount = amount, "Granted organization credits");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(balance: i64, payments: i64, idle_days: i64) -> (TrialInputs, DateTime<Utc>) {
        let now = Utc::now();
        let created = now - Duration::days(idle_days);
        (
            TrialInputs {
                balance,
                successful_payments: payments,
                user_created_at: created,
                last_session_at: None,
                last_debit_at: None,
            },
            now,
        )
    }

    #[test]
    fn test_active_trial_user_is_not_blocked() {
        let (i, now) = inputs(5, 0, 10);
        let status = TrialPolicy::default().evaluate(&i, now);
        assert!(!status.blocked);
        assert_eq!(status.reason, None);
        assert_eq!(status.remaining_trial_credits, 5);
    }

    #[test]
    fn test_exhausted_trial_is_blocked() {
        let (i, now) = inputs(0, 0, 1);
        let status = TrialPolicy::default().evaluate(&i, now);
        assert!(status.blocked);
        assert_eq!(status.reason, Some(BlockReason::TrialCreditsExhausted));

        let (i, now) = inputs(-2, 0, 1);
        assert!(TrialPolicy::default().evaluate(&i, now).blocked);
    }

    #[test]
    fn test_inactivity_boundary() {
        let policy = TrialPolicy::default();

        let (i, now) = inputs(5, 0, 89);
        assert!(!policy.evaluate(&i, now).blocked);

        let (i, now) = inputs(5, 0, 90);
        let status = policy.evaluate(&i, now);
        assert!(status.blocked);
        assert_eq!(status.reason, Some(BlockReason::Inactive));
    }

    #[test]
    fn test_paying_user_is_never_blocked() {
        let policy = TrialPolicy::default();

        let (i, now) = inputs(0, 1, 400);
        let status = policy.evaluate(&i, now);
        assert!(!status.blocked);
        assert_eq!(status.successful_payments, 1);
    }

    #[test]
    fn test_recent_session_counts_as_activity() {
        let (mut i, now) = inputs(5, 0, 200);
        i.last_session_at = Some(now - Duration::days(3));
        let status = TrialPolicy::default().evaluate(&i, now);
        assert!(!status.blocked);
        assert_eq!(status.last_activity_at, now - Duration::days(3));
    }

    #[test]
    fn test_last_activity_takes_latest() {
        let (mut i, now) = inputs(5, 0, 200);
        i.last_session_at = Some(now - Duration::days(50));
        i.last_debit_at = Some(now - Duration::days(20));
        assert_eq!(i.last_activity(), now - Duration::days(20));

        // Timestamps older than creation do not move activity backwards
        i.last_session_at = None;
        i.last_debit_at = Some(now - Duration::days(300));
        assert_eq!(i.last_activity(), i.user_created_at);
    }

    #[test]
    fn test_block_reason_strings() {
        assert_eq!(BlockReason::TrialCreditsExhausted.as_str(), "trial_credits_exhausted");
        assert_eq!(BlockReason::Inactive.as_str(), "inactive");
        assert_eq!(
            serde_json::to_string(&BlockReason::Inactive).unwrap(),
            "\"inactive\""
        );
    }

    #[test]
    fn test_fold_balance() {
        use TransactionType::{Credit, Debit};

        assert_eq!(fold_balance(Vec::<(TransactionType, i32)>::new()), 0);
        assert_eq!(fold_balance(vec![(Credit, 10), (Debit, 1), (Debit, 1)]), 8);
        assert_eq!(fold_balance(vec![(Debit, 3)]), -3);

        // Order does not matter
        let history = vec![(Credit, 5), (Debit, 2), (Credit, 7), (Debit, 4), (Debit, 1)];
        let mut reversed = history.clone();
        reversed.reverse();
        assert_eq!(fold_balance(history), fold_balance(reversed));
    }

    #[test]
    fn test_fold_balance_matches_sums() {
        // Deterministic pseudo-random histories
        let mut seed: u64 = 0x2545F4914F6CDD1D;
        for _ in 0..50 {
            let mut rows = Vec::new();
            let (mut credits, mut debits) = (0i64, 0i64);
            for _ in 0..(seed % 20) {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let amount = (seed % 50) as i32 + 1;
                if seed % 2 == 0 {
                    credits += amount as i64;
                    rows.push((TransactionType::Credit, amount));
                } else {
                    debits += amount as i64;
                    rows.push((TransactionType::Debit, amount));
                }
            }
            assert_eq!(fold_balance(rows), credits - debits);
            seed = seed.wrapping_add(0x9E3779B97F4A7C15);
        }
    }
}

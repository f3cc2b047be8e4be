//! Business rule validation for transaction input.

use chrono::{DateTime, Utc};

use super::error::LedgerError;
use super::record::{TransactionDraft, ValidTransaction};
use super::references::ReferenceCatalog;

/// Checks the rules that need no lookups.
///
/// - amount must be strictly positive
/// - date must not be after `now`
/// - expenses must carry a category
///
/// # Errors
///
/// Returns the first rule the draft breaks.
pub fn check_draft(draft: &TransactionDraft, now: DateTime<Utc>) -> Result<(), LedgerError> {
    if !draft.amount.is_positive() {
        return Err(LedgerError::NonPositiveAmount(draft.amount));
    }

    if draft.date > now {
        return Err(LedgerError::FutureDate {
            date: draft.date,
            now,
        });
    }

    if draft.direction.requires_category() && draft.category_id.is_none() {
        return Err(LedgerError::MissingCategory);
    }

    Ok(())
}

/// Validates a draft and resolves its references.
///
/// # Errors
///
/// Returns a validation error if a rule is broken or a referenced category
/// or group does not exist, or the catalog's own error if a lookup fails.
pub async fn validate_draft(
    draft: TransactionDraft,
    now: DateTime<Utc>,
    catalog: &dyn ReferenceCatalog,
) -> Result<ValidTransaction, LedgerError> {
    check_draft(&draft, now)?;

    if let Some(category_id) = draft.category_id {
        if !catalog.category_exists(category_id).await? {
            return Err(LedgerError::UnknownCategory(category_id));
        }
    }

    if let Some(group_id) = draft.group_id {
        if !catalog.group_exists(group_id).await? {
            return Err(LedgerError::UnknownGroup(group_id));
        }
    }

    Ok(ValidTransaction::new_unchecked(draft))
}

impl TransactionDraft {
    /// Validates the draft against `now` and the reference catalog.
    ///
    /// # Errors
    ///
    /// See [`validate_draft`].
    pub async fn validate(
        self,
        now: DateTime<Utc>,
        catalog: &dyn ReferenceCatalog,
    ) -> Result<ValidTransaction, LedgerError> {
        validate_draft(self, now, catalog).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::Direction;
    use crate::ledger::testing::StaticCatalog;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use tally_shared::types::{CategoryId, GroupId, Money, UserId};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn draft(direction: Direction, cents: i64, category: bool) -> TransactionDraft {
        TransactionDraft {
            user_id: UserId::new(),
            amount: Money::new(Decimal::new(cents, 2)),
            direction,
            date: now() - Duration::days(1),
            category_id: category.then(CategoryId::new),
            group_id: None,
        }
    }

    #[rstest]
    #[case(Direction::Expense, 3000, true)]
    #[case(Direction::Income, 5000, false)]
    #[case(Direction::Income, 1, true)]
    fn test_valid_drafts(#[case] direction: Direction, #[case] cents: i64, #[case] category: bool) {
        assert!(check_draft(&draft(direction, cents, category), now()).is_ok());
    }

    #[rstest]
    #[case(0)]
    #[case(-100)]
    fn test_non_positive_amount_rejected(#[case] cents: i64) {
        let result = check_draft(&draft(Direction::Income, cents, false), now());
        assert!(matches!(result, Err(LedgerError::NonPositiveAmount(_))));
    }

    #[test]
    fn test_expense_requires_category() {
        let result = check_draft(&draft(Direction::Expense, 100, false), now());
        assert!(matches!(result, Err(LedgerError::MissingCategory)));
    }

    #[test]
    fn test_future_date_rejected() {
        let mut future = draft(Direction::Income, 100, false);
        future.date = now() + Duration::seconds(1);
        let result = check_draft(&future, now());
        assert!(matches!(result, Err(LedgerError::FutureDate { .. })));
    }

    #[test]
    fn test_date_equal_to_now_accepted() {
        let mut edge = draft(Direction::Income, 100, false);
        edge.date = now();
        assert!(check_draft(&edge, now()).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_category_rejected() {
        let catalog = StaticCatalog::default();
        let result = validate_draft(draft(Direction::Expense, 100, true), now(), &catalog).await;
        assert!(matches!(result, Err(LedgerError::UnknownCategory(_))));
    }

    #[tokio::test]
    async fn test_unknown_group_rejected() {
        let catalog = StaticCatalog::default();
        let mut input = draft(Direction::Income, 100, false);
        input.group_id = Some(GroupId::new());
        let result = validate_draft(input, now(), &catalog).await;
        assert!(matches!(result, Err(LedgerError::UnknownGroup(_))));
    }

    #[tokio::test]
    async fn test_known_references_accepted() {
        let catalog = StaticCatalog::default();
        let category = catalog.add_category();
        let group = catalog.add_group();
        let input = TransactionDraft::expense(
            UserId::new(),
            Money::new(Decimal::new(1999, 2)),
            now(),
            category,
        )
        .with_group(group);

        let valid = validate_draft(input.clone(), now(), &catalog).await.unwrap();
        assert_eq!(valid.as_draft(), &input);
    }
}

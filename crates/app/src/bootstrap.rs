//! Startup resolution of the owners and their category bindings.
use api_types::budget::Category;
use engine::{CategoryBinding, EngineError, Gateway, LedgerApi, Owner};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{
    error::Result,
    settings::{OwnerSettings, Settings},
    state::{OwnerState, StateStore},
};

/// Lowercase alphanumeric words of `input`, accents and symbols stripped.
fn normalize_key(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut out = String::new();
    let mut prev_space = false;
    for ch in trimmed.nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            prev_space = false;
        } else if !out.is_empty() && !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }
    let normalized = out.trim();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

/// Finds the shared and balancing categories by name.
///
/// The shared category is the first whose name contains `shared_name` but not
/// `balancing_name`, since the balancing name usually extends the shared one.
pub fn resolve_binding(
    categories: &[Category],
    shared_name: &str,
    balancing_name: &str,
) -> std::result::Result<CategoryBinding, EngineError> {
    let key = |name: &str| {
        normalize_key(name)
            .ok_or_else(|| EngineError::Configuration(format!("invalid category name {name:?}")))
    };
    let shared_key = key(shared_name)?;
    let balancing_key = key(balancing_name)?;

    let live: Vec<_> = categories
        .iter()
        .filter(|c| !c.deleted)
        .filter_map(|c| normalize_key(&c.name).map(|name| (name, c)))
        .collect();
    let shared = live
        .iter()
        .find(|(name, _)| name.contains(&shared_key) && !name.contains(&balancing_key))
        .map(|(_, c)| *c)
        .ok_or_else(|| {
            EngineError::Configuration(format!("category {shared_name} not found"))
        })?;
    let balancing = live
        .iter()
        .find(|(name, _)| name.contains(&balancing_key))
        .map(|(_, c)| *c)
        .ok_or_else(|| {
            EngineError::Configuration(format!("category {balancing_name} not found"))
        })?;

    CategoryBinding::new(&shared.category_group_id, &shared.id, &balancing.id)
}

async fn binding<A: LedgerApi>(
    gateway: &Gateway<A>,
    config: &OwnerSettings,
    saved: OwnerState,
    force_refresh: bool,
) -> Result<CategoryBinding> {
    if let Some(binding) = saved.categories
        && !force_refresh
    {
        tracing::debug!("{} - Using saved categories", config.name);
        return Ok(binding);
    }

    tracing::info!("{} - Looking up categories", config.name);
    let ledger = gateway.ledger(&config.budget_id).await?;
    let binding = resolve_binding(
        &ledger.categories,
        &config.shared_category_name,
        &config.balancing_category_name,
    )
    .map_err(|err| match err {
        EngineError::Configuration(msg) => {
            EngineError::Configuration(format!("{}: {msg}", config.name))
        }
        other => other,
    })?;
    Ok(binding)
}

/// Builds the configured owners, looking their categories up unless a saved
/// binding exists and `force_refresh` is off.
pub async fn owners<A: LedgerApi>(
    gateway: &Gateway<A>,
    settings: &Settings,
    store: &StateStore,
    force_refresh: bool,
) -> Result<Vec<Owner>> {
    let mut owners = Vec::with_capacity(settings.owners.len());
    for config in &settings.owners {
        let saved = store.load_owner(&config.name)?;
        let binding = binding(gateway, config, saved, force_refresh).await?;
        owners.push(Owner {
            name: config.name.clone(),
            ledger_id: config.budget_id.clone(),
            shared_account_id: config.shared_account_id.clone(),
            shared_payee_id: config.shared_payee_id.clone(),
            balancing_account_id: config.balancing_account_id.clone(),
            binding,
        });
    }
    Ok(owners)
}

pub fn save_bindings(store: &StateStore, owners: &[Owner]) -> Result<()> {
    for owner in owners {
        let state = OwnerState {
            categories: Some(owner.binding.clone()),
        };
        store.save_owner(&owner.name, &state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: id.to_string(),
            category_group_id: "group".to_string(),
            name: name.to_string(),
            budgeted: 0,
            deleted: false,
        }
    }

    #[test]
    fn normalize_strips_accents_and_symbols() {
        assert_eq!(normalize_key("  Spése   Comuni!"), Some("spese comuni".to_string()));
        assert_eq!(normalize_key("🤝 Shared"), Some("shared".to_string()));
        assert_eq!(normalize_key(" -- "), None);
    }

    #[test]
    fn balancing_name_extending_shared_name() {
        let categories = vec![
            category("c0", "Groceries"),
            category("c1", "🤝 Shared Expenses Balancing"),
            category("c2", "🤝 Shared Expenses"),
        ];
        let binding =
            resolve_binding(&categories, "Shared Expenses", "shared expenses balancing").unwrap();
        assert_eq!(binding.shared_category_id, "c2");
        assert_eq!(binding.shared_category_balancing_id, "c1");
        assert_eq!(binding.shared_category_group_id, "group");
    }

    #[test]
    fn deleted_or_missing_category_is_a_configuration_error() {
        let mut deleted = category("c1", "Balancing");
        deleted.deleted = true;
        let categories = vec![category("c0", "Shared"), deleted];
        let err = resolve_binding(&categories, "Shared", "Balancing").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.is_fatal());
    }
}

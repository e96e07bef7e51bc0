//! Ownership-checked economic operations.
//!
//! Every mutating operation runs as one store transaction. A transaction
//! that loses an optimistic race is re-run from scratch with backoff, so the
//! closures passed to [`LedgerService::execute`] must be free of side effects
//! outside the transaction.

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::domain::{AnimalId, FarmId, FarmName, ProductId, UserId, Username, ValidationError};
use crate::error::{LedgerError, LedgerResult};
use crate::logging::ledger_span;
use crate::metrics::{METRICS, OperationMetrics};
use crate::model::{
    AccountReset, Animal, AnimalSale, BuyAnimalRequest, Farm, Product, ProductSale,
    SELL_PRICE_RATIO, User,
};
use crate::recovery::{ExponentialBackoff, RetryConfig, retry_async_with_policy};
use crate::store::{MemoryStore, Snapshot, Transaction};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{Instrument, info, warn};

const MAX_ANIMAL_NAME_LENGTH: usize = 100;

/// Tunables the ledger needs from the runtime configuration.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub registration_balance: Decimal,
    pub reset_balance: Decimal,
    pub default_farm_name: FarmName,
    pub seconds_per_sim_year: u32,
    pub retry: RetryConfig,
}

impl LedgerSettings {
    pub fn from_config(config: &ServerConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            registration_balance: config.registration_balance,
            reset_balance: config.reset_balance,
            default_farm_name: FarmName::new(config.default_farm_name.as_str())?,
            seconds_per_sim_year: config.seconds_per_sim_year,
            retry: RetryConfig::transactions(config.transaction_max_attempts),
        })
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            registration_balance: dec!(1000),
            reset_balance: dec!(5000),
            default_farm_name: FarmName::default(),
            seconds_per_sim_year: crate::domain::species::DEFAULT_SECONDS_PER_SIM_YEAR,
            retry: RetryConfig::transactions(5),
        }
    }
}

pub struct LedgerService {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
    retry: ExponentialBackoff,
}

impl LedgerService {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self {
        let retry = ExponentialBackoff::new(settings.retry.clone());
        Self {
            store,
            clock,
            settings,
            retry,
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Accounts and farms
    // ------------------------------------------------------------------

    /// Creates a user with the registration balance and one default farm.
    pub async fn register_user(&self, username: &str, email: &str) -> LedgerResult<User> {
        let username = Username::new(username)?;
        let email = email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(LedgerError::invalid()
                .message("email address is not valid")
                .operation("register_user")
                .param("email", &email)
                .build());
        }

        let user = User {
            id: UserId::new(),
            username,
            email,
            balance: self.settings.registration_balance,
        };
        let farm = Farm {
            id: FarmId::new(),
            name: self.settings.default_farm_name.clone(),
            owner_id: user.id,
        };

        let registered = self
            .execute("register_user", user.id, |tx| {
                if tx.user_by_username(&user.username).is_some() {
                    return Err(LedgerError::invalid()
                        .message("username is already taken")
                        .param("username", user.username.as_str())
                        .build());
                }
                tx.insert_user(user.clone());
                tx.put_farm(farm.clone());
                Ok(user.clone())
            })
            .await?;

        info!(
            user_id = %registered.id,
            username = %registered.username,
            balance = %registered.balance,
            farm_id = %farm.id,
            "user registered"
        );
        Ok(registered)
    }

    pub async fn create_farm(&self, owner: UserId, name: &str) -> LedgerResult<Farm> {
        let farm = Farm {
            id: FarmId::new(),
            name: FarmName::new(name)?,
            owner_id: owner,
        };

        let created = self
            .execute("create_farm", owner, |tx| {
                if tx.user(owner).is_none() {
                    return Err(LedgerError::not_found()
                        .message("user not found")
                        .user(owner)
                        .build());
                }
                tx.put_farm(farm.clone());
                Ok(farm.clone())
            })
            .await?;

        info!(farm_id = %created.id, owner = %owner, name = %created.name, "farm created");
        Ok(created)
    }

    pub async fn rename_farm(&self, farm_id: FarmId, owner: UserId, name: &str) -> LedgerResult<Farm> {
        let name = FarmName::new(name)?;

        self.execute("rename_farm", owner, |tx| {
            let mut farm = owned_farm(tx, farm_id, owner)?;
            farm.name = name.clone();
            tx.put_farm(farm.clone());
            Ok(farm)
        })
        .await
    }

    /// Deletes a farm together with its animals and products.
    ///
    /// Returns `false` if the farm was already gone.
    pub async fn delete_farm(&self, farm_id: FarmId, owner: UserId) -> LedgerResult<bool> {
        let removed = self
            .execute("delete_farm", owner, |tx| {
                let farm = match tx.farm(farm_id) {
                    Some(farm) => farm,
                    None => return Ok(None),
                };
                ensure_owner(&farm, owner)?;
                let (animals, products) = clear_farm(tx, farm_id);
                tx.delete_farm(farm_id);
                Ok(Some((animals, products)))
            })
            .await?;

        match removed {
            Some((animals, products)) => {
                info!(
                    farm_id = %farm_id,
                    owner = %owner,
                    removed_animals = animals,
                    removed_products = products,
                    "farm deleted"
                );
                self.refresh_live_animals();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Trading
    // ------------------------------------------------------------------

    /// Debits the price and places a newborn animal on the farm.
    pub async fn buy_animal(
        &self,
        farm_id: FarmId,
        user_id: UserId,
        request: BuyAnimalRequest,
    ) -> LedgerResult<Animal> {
        let price = request.resolved_price();
        let interval = request.resolved_interval();
        let name = request.name.trim().to_string();

        if price <= Decimal::ZERO {
            return Err(LedgerError::invalid()
                .message("price must be positive")
                .operation("buy_animal")
                .param("price", price)
                .build());
        }
        if interval < 1 {
            return Err(LedgerError::invalid()
                .message("production interval must be at least one second")
                .operation("buy_animal")
                .build());
        }
        if name.is_empty() || name.chars().count() > MAX_ANIMAL_NAME_LENGTH {
            return Err(LedgerError::invalid()
                .message(format!(
                    "animal name must be 1 to {} characters",
                    MAX_ANIMAL_NAME_LENGTH
                ))
                .operation("buy_animal")
                .build());
        }

        let animal_id = AnimalId::new();
        let species = request.species;
        let lifespan_seconds = species.lifespan_secs(self.settings.seconds_per_sim_year);

        let animal = self
            .execute("buy_animal", user_id, |tx| {
                owned_farm(tx, farm_id, user_id)?;
                tx.debit(user_id, price)?;

                let now = self.clock.now();
                let animal = Animal {
                    id: animal_id,
                    farm_id,
                    species,
                    name: name.clone(),
                    birth_time: now,
                    lifespan_seconds,
                    production_interval_seconds: interval,
                    next_production_time: Some(now + Duration::seconds(i64::from(interval))),
                    purchase_price: price,
                    sell_price: price * SELL_PRICE_RATIO,
                };
                tx.put_animal(animal.clone());
                Ok(animal)
            })
            .await?;

        info!(
            animal_id = %animal.id,
            farm_id = %farm_id,
            user_id = %user_id,
            species = %animal.species,
            price = %animal.purchase_price,
            "animal bought"
        );
        self.refresh_live_animals();
        Ok(animal)
    }

    /// Credits the animal's sell price and removes it.
    ///
    /// `Ok(None)` means the animal no longer exists (already sold or dead).
    pub async fn sell_animal(
        &self,
        animal_id: AnimalId,
        user_id: UserId,
    ) -> LedgerResult<Option<AnimalSale>> {
        let sale = self
            .execute("sell_animal", user_id, |tx| {
                let animal = match tx.animal(animal_id) {
                    Some(animal) => animal,
                    None => return Ok(None),
                };
                let farm = farm_of_row(tx, animal.farm_id, animal_id)?;
                ensure_owner(&farm, user_id)?;

                let balance_after = tx.credit(user_id, animal.sell_price)?;
                tx.delete_animal(animal_id);
                Ok(Some(AnimalSale {
                    proceeds: animal.sell_price,
                    animal,
                    balance_after,
                }))
            })
            .await?;

        match &sale {
            Some(sale) => {
                info!(
                    animal_id = %animal_id,
                    user_id = %user_id,
                    proceeds = %sale.proceeds,
                    "animal sold"
                );
                self.refresh_live_animals();
            }
            None => info!(animal_id = %animal_id, "animal already gone, nothing sold"),
        }
        Ok(sale)
    }

    /// Sells `quantity` units from a stock row, removing the row at zero.
    ///
    /// `Ok(None)` means the row no longer exists.
    pub async fn sell_product(
        &self,
        product_id: ProductId,
        user_id: UserId,
        quantity: u32,
    ) -> LedgerResult<Option<ProductSale>> {
        if quantity == 0 {
            return Err(LedgerError::invalid()
                .message("quantity must be at least 1")
                .operation("sell_product")
                .entity(product_id)
                .build());
        }

        let sale = self
            .execute("sell_product", user_id, |tx| {
                let mut product = match tx.product(product_id) {
                    Some(product) => product,
                    None => return Ok(None),
                };
                let farm = farm_of_row(tx, product.farm_id, product_id)?;
                ensure_owner(&farm, user_id)?;

                if quantity > product.quantity {
                    return Err(LedgerError::invalid()
                        .message("insufficient stock")
                        .entity(product_id)
                        .param("requested", quantity)
                        .param("available", product.quantity)
                        .build());
                }

                let proceeds = product.unit_sale_price * Decimal::from(quantity);
                tx.credit(user_id, proceeds)?;

                product.quantity -= quantity;
                let remaining_quantity = product.quantity;
                if remaining_quantity == 0 {
                    tx.delete_product(product_id);
                } else {
                    tx.put_product(product.clone());
                }

                Ok(Some(ProductSale {
                    product_id,
                    farm_id: product.farm_id,
                    product_kind: product.product_kind,
                    quantity_sold: quantity,
                    unit_sale_price: product.unit_sale_price,
                    proceeds,
                    remaining_quantity,
                }))
            })
            .await?;

        if let Some(sale) = &sale {
            info!(
                product_id = %product_id,
                user_id = %user_id,
                quantity = sale.quantity_sold,
                proceeds = %sale.proceeds,
                remaining = sale.remaining_quantity,
                "product sold"
            );
        }
        Ok(sale)
    }

    /// Liquidates every stock row on the farm and returns the total credited.
    pub async fn sell_all_products(&self, farm_id: FarmId, user_id: UserId) -> LedgerResult<Decimal> {
        let (total, rows) = self
            .execute("sell_all_products", user_id, |tx| {
                owned_farm(tx, farm_id, user_id)?;

                let products = tx.products_on(farm_id);
                if products.is_empty() {
                    return Ok((Decimal::ZERO, 0));
                }

                let total: Decimal = products.iter().map(Product::stock_value).sum();
                tx.credit(user_id, total)?;
                for product in &products {
                    tx.delete_product(product.id);
                }
                Ok((total, products.len()))
            })
            .await?;

        info!(
            farm_id = %farm_id,
            user_id = %user_id,
            rows,
            total = %total,
            "sold all products"
        );
        Ok(total)
    }

    /// Wipes everything the user owns and restores the starting state.
    pub async fn reset_account(&self, user_id: UserId) -> LedgerResult<AccountReset> {
        let fresh_farm = Farm {
            id: FarmId::new(),
            name: self.settings.default_farm_name.clone(),
            owner_id: user_id,
        };
        let reset_balance = self.settings.reset_balance;

        let reset = self
            .execute("reset_account", user_id, |tx| {
                if tx.user(user_id).is_none() {
                    return Err(LedgerError::not_found()
                        .message("user not found")
                        .user(user_id)
                        .build());
                }

                let farms = tx.farms_owned_by(user_id);
                let mut removed_animals = 0;
                let mut removed_products = 0;
                for farm in &farms {
                    let (animals, products) = clear_farm(tx, farm.id);
                    removed_animals += animals;
                    removed_products += products;
                    tx.delete_farm(farm.id);
                }

                tx.set_balance(user_id, reset_balance)?;
                tx.put_farm(fresh_farm.clone());

                let user = tx.user(user_id).ok_or_else(|| {
                    LedgerError::fatal()
                        .message("user vanished inside its own transaction")
                        .user(user_id)
                        .build()
                })?;

                Ok(AccountReset {
                    user,
                    farm: fresh_farm.clone(),
                    removed_farms: farms.len(),
                    removed_animals,
                    removed_products,
                })
            })
            .await?;

        warn!(
            user_id = %user_id,
            removed_farms = reset.removed_farms,
            removed_animals = reset.removed_animals,
            removed_products = reset.removed_products,
            balance = %reset.user.balance,
            "account reset"
        );
        self.refresh_live_animals();
        Ok(reset)
    }

    // ------------------------------------------------------------------
    // Queries (committed state only)
    // ------------------------------------------------------------------

    pub fn get_user(&self, user_id: UserId) -> LedgerResult<User> {
        self.store
            .snapshot()
            .user(user_id)
            .ok_or_else(|| user_not_found(user_id))
    }

    pub fn get_balance(&self, user_id: UserId) -> LedgerResult<Decimal> {
        self.get_user(user_id).map(|user| user.balance)
    }

    pub fn list_farms(&self, owner: UserId) -> LedgerResult<Vec<Farm>> {
        let snapshot = self.store.snapshot();
        if snapshot.user(owner).is_none() {
            return Err(user_not_found(owner));
        }
        let mut farms = snapshot.farms_owned_by(owner);
        farms.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(farms)
    }

    pub fn get_farm(&self, farm_id: FarmId, user_id: UserId) -> LedgerResult<Farm> {
        let snapshot = self.store.snapshot();
        visible_farm(&snapshot, farm_id, user_id)
    }

    pub fn list_farm_animals(&self, farm_id: FarmId, user_id: UserId) -> LedgerResult<Vec<Animal>> {
        let snapshot = self.store.snapshot();
        visible_farm(&snapshot, farm_id, user_id)?;
        let mut animals = snapshot.animals_on(farm_id);
        animals.sort_by_key(|animal| animal.birth_time);
        Ok(animals)
    }

    pub fn list_farm_products(&self, farm_id: FarmId, user_id: UserId) -> LedgerResult<Vec<Product>> {
        let snapshot = self.store.snapshot();
        visible_farm(&snapshot, farm_id, user_id)?;
        let mut products = snapshot.products_on(farm_id);
        products.sort_by_key(|product| product.product_kind as u8);
        Ok(products)
    }

    pub fn get_animal(&self, animal_id: AnimalId, user_id: UserId) -> LedgerResult<Animal> {
        let snapshot = self.store.snapshot();
        let animal = snapshot.animal(animal_id).ok_or_else(|| {
            LedgerError::not_found()
                .message("animal not found")
                .entity(animal_id)
                .build()
        })?;
        let farm = snapshot
            .farm(animal.farm_id)
            .ok_or_else(|| orphan(animal.farm_id, animal_id))?;
        ensure_owner(&farm, user_id)?;
        Ok(animal)
    }

    pub fn get_product(&self, product_id: ProductId, user_id: UserId) -> LedgerResult<Product> {
        let snapshot = self.store.snapshot();
        let product = snapshot.product(product_id).ok_or_else(|| {
            LedgerError::not_found()
                .message("product not found")
                .entity(product_id)
                .build()
        })?;
        let farm = snapshot
            .farm(product.farm_id)
            .ok_or_else(|| orphan(product.farm_id, product_id))?;
        ensure_owner(&farm, user_id)?;
        Ok(product)
    }

    // ------------------------------------------------------------------

    /// Runs `work` as a transaction, retrying `Transient` failures.
    async fn execute<T, F>(&self, operation: &'static str, user_id: UserId, work: F) -> LedgerResult<T>
    where
        F: Fn(&mut Transaction<'_>) -> LedgerResult<T>,
    {
        let metrics = OperationMetrics::new(operation);
        let attempts = AtomicU32::new(0);
        let user = user_id.to_string();

        let result = retry_async_with_policy(
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    METRICS.record_retry(operation);
                }
                std::future::ready(self.store.transaction(&work))
            },
            &self.retry,
            operation,
        )
        .instrument(ledger_span(operation, &user))
        .await;

        match result {
            Ok(value) => {
                metrics.success();
                Ok(value)
            }
            Err(error) => {
                let mut error = error.in_operation(operation);
                if error.context.user_id.is_none() {
                    error.context.user_id = Some(user_id);
                }
                error.track();
                metrics.error(error.kind);
                warn!(
                    operation,
                    user_id = %user_id,
                    kind = %error.kind,
                    error_id = %error.error_id,
                    attempts = attempts.load(Ordering::Relaxed),
                    message = %error.message,
                    "ledger operation failed"
                );
                Err(error)
            }
        }
    }

    fn refresh_live_animals(&self) {
        METRICS.set_live_animals(self.store.stats().animals);
    }
}

fn ensure_owner(farm: &Farm, user_id: UserId) -> LedgerResult<()> {
    if farm.owner_id != user_id {
        return Err(LedgerError::forbidden()
            .message("farm belongs to another user")
            .user(user_id)
            .farm(farm.id)
            .build());
    }
    Ok(())
}

fn owned_farm(tx: &mut Transaction<'_>, farm_id: FarmId, user_id: UserId) -> LedgerResult<Farm> {
    let farm = tx.farm(farm_id).ok_or_else(|| {
        LedgerError::not_found()
            .message("farm not found")
            .farm(farm_id)
            .build()
    })?;
    ensure_owner(&farm, user_id)?;
    Ok(farm)
}

fn farm_of_row(
    tx: &mut Transaction<'_>,
    farm_id: FarmId,
    row: impl std::fmt::Display,
) -> LedgerResult<Farm> {
    tx.farm(farm_id).ok_or_else(|| orphan(farm_id, row))
}

/// Deletes the farm's animals and products; the farm row itself stays.
fn clear_farm(tx: &mut Transaction<'_>, farm_id: FarmId) -> (usize, usize) {
    let animals = tx.animals_on(farm_id);
    for animal in &animals {
        tx.delete_animal(animal.id);
    }
    let products = tx.products_on(farm_id);
    for product in &products {
        tx.delete_product(product.id);
    }
    (animals.len(), products.len())
}

fn visible_farm(snapshot: &Snapshot<'_>, farm_id: FarmId, user_id: UserId) -> LedgerResult<Farm> {
    let farm = snapshot.farm(farm_id).ok_or_else(|| {
        LedgerError::not_found()
            .message("farm not found")
            .farm(farm_id)
            .build()
    })?;
    ensure_owner(&farm, user_id)?;
    Ok(farm)
}

fn orphan(farm_id: FarmId, row: impl std::fmt::Display) -> LedgerError {
    LedgerError::fatal()
        .message("row references a farm that does not exist")
        .farm(farm_id)
        .entity(row)
        .build()
}

fn user_not_found(user_id: UserId) -> LedgerError {
    LedgerError::not_found()
        .message("user not found")
        .user(user_id)
        .build()
}

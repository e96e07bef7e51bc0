use super::table::TxTable;
use super::{MemoryStore, Tables};
use crate::domain::{AnimalId, FarmId, ProductId, ProductKind, UserId, Username};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::model::{Animal, Farm, Product, User};
use chrono::{DateTime, Utc};
use parking_lot::RwLockReadGuard;
use rust_decimal::Decimal;

/// Unit of work against a [`MemoryStore`].
///
/// Every accessor briefly takes the table read lock; nothing is held
/// between calls, so long-running work never blocks other writers.
pub struct Transaction<'s> {
    store: &'s MemoryStore,
    users: TxTable<UserId, User>,
    farms: TxTable<FarmId, Farm>,
    animals: TxTable<AnimalId, Animal>,
    products: TxTable<ProductId, Product>,
}

impl<'s> Transaction<'s> {
    pub(super) fn begin(store: &'s MemoryStore) -> Self {
        Self {
            store,
            users: TxTable::new("users"),
            farms: TxTable::new("farms"),
            animals: TxTable::new("animals"),
            products: TxTable::new("products"),
        }
    }

    fn committed(&self) -> RwLockReadGuard<'s, Tables> {
        self.store.tables.read()
    }

    // ---- users ----

    pub fn user(&mut self, id: UserId) -> Option<User> {
        let tables = self.committed();
        self.users.get(&tables.users, id)
    }

    pub fn user_by_username(&mut self, username: &Username) -> Option<User> {
        let tables = self.committed();
        let wanted = username.clone();
        self.users
            .scan(&tables.users, move |user| user.username == wanted)
            .into_iter()
            .next()
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.put(user.id, user);
    }

    /// Adds `amount` to the user's balance and returns the new balance.
    pub fn credit(&mut self, user_id: UserId, amount: Decimal) -> LedgerResult<Decimal> {
        let mut user = self.require_user(user_id)?;
        user.balance += amount;
        let balance = user.balance;
        self.users.put(user_id, user);
        Ok(balance)
    }

    /// Subtracts `amount` from the user's balance. Refuses to go negative.
    pub fn debit(&mut self, user_id: UserId, amount: Decimal) -> LedgerResult<Decimal> {
        let mut user = self.require_user(user_id)?;
        if user.balance < amount {
            return Err(LedgerError::invalid()
                .message("insufficient balance")
                .user(user_id)
                .param("balance", user.balance)
                .param("required", amount)
                .build());
        }
        user.balance -= amount;
        let balance = user.balance;
        self.users.put(user_id, user);
        Ok(balance)
    }

    pub fn set_balance(&mut self, user_id: UserId, balance: Decimal) -> LedgerResult<()> {
        let mut user = self.require_user(user_id)?;
        user.balance = balance;
        self.users.put(user_id, user);
        Ok(())
    }

    fn require_user(&mut self, user_id: UserId) -> LedgerResult<User> {
        self.user(user_id).ok_or_else(|| {
            LedgerError::not_found()
                .message("user not found")
                .user(user_id)
                .build()
        })
    }

    // ---- farms ----

    pub fn farm(&mut self, id: FarmId) -> Option<Farm> {
        let tables = self.committed();
        self.farms.get(&tables.farms, id)
    }

    pub fn farms_owned_by(&mut self, owner: UserId) -> Vec<Farm> {
        let tables = self.committed();
        self.farms
            .scan(&tables.farms, move |farm| farm.owner_id == owner)
    }

    pub fn put_farm(&mut self, farm: Farm) {
        self.farms.put(farm.id, farm);
    }

    pub fn delete_farm(&mut self, id: FarmId) {
        self.farms.delete(id);
    }

    // ---- animals ----

    pub fn animal(&mut self, id: AnimalId) -> Option<Animal> {
        let tables = self.committed();
        self.animals.get(&tables.animals, id)
    }

    pub fn animals_on(&mut self, farm_id: FarmId) -> Vec<Animal> {
        let tables = self.committed();
        self.animals
            .scan(&tables.animals, move |animal| animal.farm_id == farm_id)
    }

    /// Animals whose age has reached their lifespan at `now`.
    pub fn expired_animals(&mut self, now: DateTime<Utc>) -> Vec<Animal> {
        let tables = self.committed();
        self.animals
            .scan(&tables.animals, move |animal| animal.is_expired_at(now))
    }

    pub fn put_animal(&mut self, animal: Animal) {
        self.animals.put(animal.id, animal);
    }

    pub fn delete_animal(&mut self, id: AnimalId) {
        self.animals.delete(id);
    }

    // ---- products ----

    pub fn product(&mut self, id: ProductId) -> Option<Product> {
        let tables = self.committed();
        self.products.get(&tables.products, id)
    }

    pub fn products_on(&mut self, farm_id: FarmId) -> Vec<Product> {
        let tables = self.committed();
        self.products
            .scan(&tables.products, move |product| product.farm_id == farm_id)
    }

    /// The stock row for `(farm_id, kind)`, if any.
    ///
    /// Recorded as a scan, so a concurrent insert of the same pair conflicts.
    pub fn product_for(&mut self, farm_id: FarmId, kind: ProductKind) -> Option<Product> {
        let tables = self.committed();
        self.products
            .scan(&tables.products, move |product| {
                product.farm_id == farm_id && product.product_kind == kind
            })
            .into_iter()
            .next()
    }

    pub fn put_product(&mut self, product: Product) {
        self.products.put(product.id, product);
    }

    pub fn delete_product(&mut self, id: ProductId) {
        self.products.delete(id);
    }

    // ---- commit ----

    pub(super) fn is_dirty(&self) -> bool {
        self.users.is_dirty()
            || self.farms.is_dirty()
            || self.animals.is_dirty()
            || self.products.is_dirty()
    }

    pub(super) fn validate(&self, tables: &Tables) -> Result<(), StoreError> {
        self.users.validate(&tables.users)?;
        self.farms.validate(&tables.farms)?;
        self.animals.validate(&tables.animals)?;
        self.products.validate(&tables.products)
    }

    /// Checks the ownership chain as it would look after this commit.
    pub(super) fn check_integrity(&self, tables: &Tables) -> Result<(), StoreError> {
        for (id, farm) in self.farms.upserts() {
            if self.users.resolved(&tables.users, &farm.owner_id).is_none() {
                return Err(StoreError::Integrity(format!(
                    "farm {} references missing owner {}",
                    id, farm.owner_id
                )));
            }
        }

        for (id, animal) in self.animals.upserts() {
            if self.farms.resolved(&tables.farms, &animal.farm_id).is_none() {
                return Err(StoreError::Integrity(format!(
                    "animal {} references missing farm {}",
                    id, animal.farm_id
                )));
            }
        }

        let products = self.products.resolved_values(&tables.products);
        for (id, product) in self.products.upserts() {
            if product.quantity == 0 {
                return Err(StoreError::Integrity(format!(
                    "product {} would be stored with zero quantity",
                    id
                )));
            }
            if self.farms.resolved(&tables.farms, &product.farm_id).is_none() {
                return Err(StoreError::Integrity(format!(
                    "product {} references missing farm {}",
                    id, product.farm_id
                )));
            }
            let duplicates = products
                .iter()
                .filter(|other| {
                    other.farm_id == product.farm_id && other.product_kind == product.product_kind
                })
                .count();
            if duplicates > 1 {
                return Err(StoreError::Integrity(format!(
                    "farm {} would hold {} rows of {}",
                    product.farm_id, duplicates, product.product_kind
                )));
            }
        }

        let deleted_farms: Vec<FarmId> = self.farms.deletes().copied().collect();
        if !deleted_farms.is_empty() {
            let animals = self.animals.resolved_values(&tables.animals);
            for farm_id in &deleted_farms {
                if animals.iter().any(|animal| animal.farm_id == *farm_id)
                    || products.iter().any(|product| product.farm_id == *farm_id)
                {
                    return Err(StoreError::Integrity(format!(
                        "farm {} deleted while rows still reference it",
                        farm_id
                    )));
                }
            }
        }

        Ok(())
    }

    pub(super) fn apply(self, tables: &mut Tables, version: u64) -> usize {
        self.users.apply(&mut tables.users, version)
            + self.farms.apply(&mut tables.farms, version)
            + self.animals.apply(&mut tables.animals, version)
            + self.products.apply(&mut tables.products, version)
    }
}

/// Read-only view of committed state, consistent for its whole lifetime.
pub struct Snapshot<'s> {
    tables: RwLockReadGuard<'s, Tables>,
}

impl<'s> Snapshot<'s> {
    pub(super) fn new(tables: RwLockReadGuard<'s, Tables>) -> Self {
        Self { tables }
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.tables.users.get(&id).map(|row| row.value.clone())
    }

    pub fn farm(&self, id: FarmId) -> Option<Farm> {
        self.tables.farms.get(&id).map(|row| row.value.clone())
    }

    pub fn farms_owned_by(&self, owner: UserId) -> Vec<Farm> {
        self.tables
            .farms
            .values()
            .filter(|farm| farm.owner_id == owner)
            .cloned()
            .collect()
    }

    pub fn animal(&self, id: AnimalId) -> Option<Animal> {
        self.tables.animals.get(&id).map(|row| row.value.clone())
    }

    pub fn animals_on(&self, farm_id: FarmId) -> Vec<Animal> {
        self.tables
            .animals
            .values()
            .filter(|animal| animal.farm_id == farm_id)
            .cloned()
            .collect()
    }

    /// Animals due to produce at `now`, oldest deadline first.
    pub fn animals_ready_at(&self, now: DateTime<Utc>) -> Vec<Animal> {
        let mut ready: Vec<Animal> = self
            .tables
            .animals
            .values()
            .filter(|animal| animal.is_ready_at(now))
            .cloned()
            .collect();
        ready.sort_by_key(|animal| animal.next_production_time);
        ready
    }

    pub fn product(&self, id: ProductId) -> Option<Product> {
        self.tables.products.get(&id).map(|row| row.value.clone())
    }

    pub fn products_on(&self, farm_id: FarmId) -> Vec<Product> {
        self.tables
            .products
            .values()
            .filter(|product| product.farm_id == farm_id)
            .cloned()
            .collect()
    }
}

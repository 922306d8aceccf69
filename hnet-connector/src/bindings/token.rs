use super::{decode_uint, named, uint};
use crate::{
    client::{ContractClient, TxOptions},
    contracts::ContractKind,
    error::{CallError, SubmitError},
    gateway::{Args, Value},
    waiter::PendingTransaction,
};

/// The fungible token contract. Amounts are in the token's smallest unit.
#[derive(Clone)]
pub struct TokenContract {
    client: ContractClient,
}

impl TokenContract {
    pub fn new(client: ContractClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ContractClient {
        &self.client
    }

    pub async fn approve(
        &self,
        spender: &str,
        amount: u128,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([("spender", Value::from(spender)), ("amount", uint(amount))]);
        self.transact("approve", args, options).await
    }

    pub async fn transfer(
        &self,
        to: &str,
        amount: u128,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([("to", Value::from(to)), ("amount", uint(amount))]);
        self.transact("transfer", args, options).await
    }

    pub async fn allowance(&self, owner: &str, spender: &str) -> Result<u128, CallError> {
        let args = named([("owner", Value::from(owner)), ("spender", Value::from(spender))]);
        self.view("allowance", args).await
    }

    pub async fn balance_of(&self, account: &str) -> Result<u128, CallError> {
        self.view("balanceOf", named([("account", Value::from(account))]))
            .await
    }

    async fn view(&self, method: &str, args: Args) -> Result<u128, CallError> {
        let value = self.client.call(ContractKind::Token, method, args).await?;
        decode_uint(method, &value)
    }

    async fn transact(
        &self,
        method: &str,
        args: Args,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        self.client.submit(ContractKind::Token, method, args, options).await
    }
}

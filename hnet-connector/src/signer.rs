use crate::gateway::{Address, SignedTransaction, UnsignedTransaction};
use anyhow::Result;

/// Turns a fully resolved transaction into a payload the gateway accepts.
///
/// Key custody lives outside the connector; implementations wrap whatever keystore
/// or remote signer the application uses.
pub trait TransactionSigner: Send + Sync {
    /// The account transactions are sent from.
    fn address(&self) -> &Address;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction>;
}

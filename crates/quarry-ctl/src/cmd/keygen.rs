//! Renter key generation.

use anyhow::Result;

use quarry_core::crypto::RenterKeypair;

pub fn cmd_keygen() -> Result<()> {
    let renter = RenterKeypair::generate();
    println!("secret : {}", renter.secret_hex());
    println!("public : {}", hex::encode(renter.public()));
    println!();
    println!("Export the secret as QUARRY_RENTER_KEY to use it with `retrieve`,");
    println!("and add the public key to [auth] trusted_renters on the node.");
    Ok(())
}

//! ShipFlow Attestation: 公開イメージへの SLSA Provenance 添付
//!
//! プッシュで得たダイジェストをサブジェクトとする in-toto ステートメントを作成し、
//! cosign で署名してレジストリに添付する。

pub mod attestor;
pub mod cosign;
pub mod statement;

pub use attestor::CosignAttestor;
pub use cosign::Cosign;
pub use statement::{SLSA_PROVENANCE_V1, Statement, build_statement};

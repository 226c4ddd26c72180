//! ShipFlow Core: リリースイメージ公開パイプラインの中核
//!
//! ship.kdl に定義された複数のビルドターゲットを、1回のリリースイベントから
//! 並行にビルド・プッシュ・アテステーションする。
//!
//! # 概要
//!
//! - **TargetRegistry**: 何をビルドするか（ship.kdl から読み込む）
//! - **Metadata**: どのタグ・ラベルで公開するか（RunEvent から導出）
//! - **RunCoordinator**: 認証を1回だけ行い、ターゲットごとにワーカーを起動する
//!
//! Docker エンジンや署名ツールとのやり取りは [`stage`] のトレイト越しに行う。

pub mod cancel;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod metadata;
pub mod model;
pub mod parser;
pub mod stage;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use coordinator::{RunCoordinator, RunObserver};
pub use discovery::{find_config_file, find_config_in};
pub use error::{
    AttestError, AuthError, BuildError, ConfigError, MetadataError, PushError, RunError,
    TargetError,
};
pub use metadata::resolve_tags;
pub use model::*;
pub use parser::{parse_config, parse_config_file};
pub use stage::{Attestor, Authenticator, Publisher};

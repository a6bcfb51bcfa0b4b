//! # 物理情報ニューラルネットワーク (PINN) 熱伝導サンプルプログラム
//!
//! `burn` フレームワークで構築したPINNを、`argmin` の L-BFGS で学習させ、
//! 1次元の非定常熱伝導方程式を解くサンプルです。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer
//! ```

use clap::Parser;
use heat_pinn::cli::{Cli, Commands};
use heat_pinn::{inference, logging, training};

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`infer`の処理に振り分けます。
fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init() {
        eprintln!("ログの初期化に失敗しました: {}", e);
    }

    let result = match cli.command {
        Commands::Train(args) => match args.into_config() {
            Ok(config) => training::run(config, &cli.artifact_dir),
            Err(e) => Err(e.into()),
        },
        Commands::Infer { resolution } => inference::run(&cli.artifact_dir, resolution),
    };

    if let Err(e) = result {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

//! myshell ライブラリ — ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//! この `lib.rs` は `benches/bench_main.rs` 等の外部クレートから
//! パーサー・展開・ビルトイン機能に直接アクセスするために存在する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`editor`] | 行エディタ（raw モード、キー入力、バッファ操作、↑↓ 履歴呼び出し） |
//! | [`history`] | コマンド履歴（`~/.myshell_history` 永続化、1000 件リング） |
//! | [`expand`] | 展開（`$VAR`/`${VAR}`、`$(...)`/`` `...` ``、クォート規則） |
//! | [`parser`] | 構文解析（パイプライン、リダイレクト、クォート、エスケープ、`&`） |
//! | [`executor`] | コマンド実行（パイプライン接続、fd 配線、プロセスグループ管理） |
//! | [`spawn`] | fork + execvp ラッパー（子プロセスのセットアップ） |
//! | [`job`] | ジョブコントロール（ジョブテーブル、fg 待機、reap、ターミナル制御） |
//! | [`signal`] | シグナル設定（SIGCHLD self-pipe、対話シグナル無視） |
//! | [`builtins`] | ビルトイン（`cd`, `exit`, `history`, `jobs`, `fg`, `bg`, `kill`, `echo` 等） |
//! | [`shell`] | シェルのグローバル状態（ジョブテーブル、履歴、プロセスグループ） |

pub mod builtins;
pub mod editor;
pub mod executor;
pub mod expand;
pub mod history;
pub mod job;
pub mod parser;
pub mod shell;
pub mod signal;
pub mod spawn;

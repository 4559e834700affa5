//! シェルのグローバル状態を保持するモジュール。
//!
//! REPL ループ・executor・builtins の全体で共有される。
//! プロンプトが表示されている間の不変条件:
//! シェル自身がターミナルのフォアグラウンドプロセスグループであり、
//! フォアグラウンドジョブの待機中ではない。

use crate::history::History;
use crate::job::JobTable;

/// シェルの実行状態。
pub struct Shell {
    /// ジョブテーブル。バックグラウンド・停止中のジョブを保持する。
    pub jobs: JobTable,
    /// コマンド履歴（`~/.myshell_history` 永続化）。
    pub history: History,
    /// シェル自身のプロセスグループ ID。ターミナルを取り戻すときに使う。
    pub shell_pgid: libc::pid_t,
    /// 制御ターミナルの fd（通常 `STDIN_FILENO`）。
    pub terminal_fd: i32,
    /// `exit` ビルトインで true にセットされ、REPL ループを終了させる。
    pub should_exit: bool,
    /// `exit` に渡された終了コード。デフォルト 0。
    pub exit_code: i32,
}

impl Shell {
    /// 状態を初期化する。履歴ファイルの読み込みもここで行う。
    ///
    /// プロセスグループの設定とターミナルの掌握は `main` が先に済ませている
    /// 前提で、ここでは現在の pgid を記録するだけ。
    pub fn new() -> Self {
        Self {
            jobs: JobTable::new(),
            history: History::new(),
            shell_pgid: unsafe { libc::getpgrp() },
            terminal_fd: libc::STDIN_FILENO,
            should_exit: false,
            exit_code: 0,
        }
    }

    /// テスト用: 履歴ファイルを読まない空の状態を作る。
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self {
            jobs: JobTable::new(),
            history: History::new_for_test(),
            shell_pgid: unsafe { libc::getpgrp() },
            terminal_fd: libc::STDIN_FILENO,
            should_exit: false,
            exit_code: 0,
        }
    }
}

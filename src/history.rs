//! コマンド履歴の管理。
//!
//! `~/.myshell_history` にプレーンテキスト（1 行 1 コマンド）で永続化し、起動時に読み込む。
//! ↑↓キーによる履歴呼び出しは [`editor`](crate::editor) 側がローカルカーソルで行い、
//! 本モジュールはエントリの保存と読み取りだけを担当する。
//!
//! ## ファイル形式
//!
//! - パス: `$HOME/.myshell_history`（`$HOME` 未設定時は `/tmp/.myshell_history`）
//! - 書き込み: 追記モード（[`OpenOptions::append`]）で 1 コマンドずつ追記
//! - 最大エントリ数: 1000（超過時は古いエントリから削除）
//! - 重複排除はしない（同じコマンドを続けて入力すればそのまま 2 エントリになる）
//! - 読み込み不能・壊れたファイルは空として扱う
//!
//! ファイルはロード時と追記時にその場で開いて閉じる。コマンド実行中に
//! 開きっぱなしの fd を持たない。

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// 保持する最大エントリ数。超過時は古いものから捨てる。
const HISTORY_MAX: usize = 1000;

/// コマンド履歴。メモリ上のエントリ列と追記専用ファイルの 2 層構造。
pub struct History {
    /// 履歴エントリのリスト（古い順）。改行を含む行はこの層に入らない
    /// （エディタが生成しない）。
    entries: Vec<String>,
    /// 履歴ファイルのパス（`~/.myshell_history`）。
    path: PathBuf,
    /// ファイル追記の失敗を報告済みかどうか。報告はセッションに 1 回だけ。
    write_error_reported: bool,
}

impl History {
    /// 新しい `History` を作成し、`~/.myshell_history` から既存エントリを読み込む。
    pub fn new() -> Self {
        let path = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join(".myshell_history");
        let mut h = Self {
            entries: Vec::new(),
            path,
            write_error_reported: false,
        };
        h.load();
        h
    }

    /// テスト用: ファイルを読まず、書き込み報告も抑止した空の履歴を作る。
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self {
            entries: Vec::new(),
            path: PathBuf::from("/dev/null"),
            write_error_reported: true,
        }
    }

    /// 履歴ファイルからエントリを読み込む。ファイルがなければ何もしない。
    ///
    /// 末尾の CR/LF を除去し、容量超過分は古い側を切り捨てる。
    fn load(&mut self) {
        if let Ok(file) = fs::File::open(&self.path) {
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(Result::ok) {
                let line = line.trim_end_matches('\r');
                if !line.is_empty() {
                    self.entries.push(line.to_string());
                }
            }
            if self.entries.len() > HISTORY_MAX {
                let start = self.entries.len() - HISTORY_MAX;
                self.entries.drain(..start);
            }
        }
    }

    /// エントリ追加 + ファイル追記。空行はスキップ。重複はそのまま記録する。
    ///
    /// ファイルへの追記に失敗してもシェルは続行する（メモリ上の履歴のみ）。
    /// 失敗の報告はセッション中 1 回だけ。
    pub fn append(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.entries.push(line.to_string());
        if self.entries.len() > HISTORY_MAX {
            self.entries.remove(0);
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            if !self.write_error_reported {
                eprintln!("myshell: history: {}: {}", self.path.display(), e);
                self.write_error_reported = true;
            }
        }
    }

    /// エントリ数を返す。エディタの履歴カーソルは `0..=len()` を動く。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// エントリが 1 件もないか。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// インデックス `i`（0 始まり、古い順）のエントリを返す。
    pub fn get(&self, i: usize) -> Option<&str> {
        self.entries.get(i).map(|s| s.as_str())
    }

    /// `(1 始まりの番号, エントリ)` の列挙。`history` ビルトインの表示用。
    pub fn list(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().enumerate().map(|(i, s)| (i + 1, s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_history(entries: &[&str]) -> History {
        History {
            entries: entries.iter().map(|s| s.to_string()).collect(),
            path: PathBuf::from("/dev/null"),
            write_error_reported: true,
        }
    }

    #[test]
    fn append_skips_empty() {
        let mut h = make_history(&[]);
        h.append("");
        h.append("   ");
        assert!(h.is_empty());
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut h = make_history(&[]);
        h.append("echo hello");
        h.append("echo hello");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(0), Some("echo hello"));
        assert_eq!(h.get(1), Some("echo hello"));
    }

    #[test]
    fn append_trims_whitespace() {
        let mut h = make_history(&[]);
        h.append("  ls -l  ");
        assert_eq!(h.get(0), Some("ls -l"));
    }

    #[test]
    fn list_is_one_based_and_ordered() {
        let h = make_history(&["first", "second", "third"]);
        let listed: Vec<(usize, &str)> = h.list().collect();
        assert_eq!(listed, vec![(1, "first"), (2, "second"), (3, "third")]);
    }

    #[test]
    fn capacity_drops_oldest() {
        let mut h = make_history(&[]);
        for i in 0..HISTORY_MAX + 5 {
            h.append(&format!("cmd {}", i));
        }
        assert_eq!(h.len(), HISTORY_MAX);
        assert_eq!(h.get(0), Some("cmd 5"));
    }

    #[test]
    fn load_reads_file_in_order() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!(".myshell_history_test_{}", std::process::id()));
        fs::write(&path, "one\ntwo\r\nthree\n").unwrap();

        let mut h = History {
            entries: Vec::new(),
            path: path.clone(),
            write_error_reported: true,
        };
        h.load();
        let _ = fs::remove_file(&path);

        assert_eq!(h.len(), 3);
        assert_eq!(h.get(1), Some("two")); // CR stripped
        assert_eq!(h.get(2), Some("three"));
    }
}

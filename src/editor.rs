//! 行エディタ: ターミナルを raw モードにして 1 行を組み立てる。
//!
//! 依存は `libc` の termios / `read(2)` / `write(2)` / `poll(2)` のみ。
//! キー入力は 1 バイトずつ読み、エスケープシーケンスと UTF-8 の続きバイトを
//! その場で解決して [`Key`] に落とす。表示はプロンプト + バッファ全体を
//! 1 回の `write(2)` で描き直す方式。
//!
//! ## raw モードのスコープ
//!
//! raw モードが有効なのは [`LineEditor::read_line`] の中だけ。[`RawGuard`] が
//! 入り口で元の termios を保存し、Drop（正常復帰・パニックのどちらでも）で
//! そのまま書き戻す。コマンドの実行中は cooked モードに戻っているので、
//! 子プロセスは通常のターミナルを見る。
//!
//! ## 履歴呼び出し
//!
//! 履歴カーソルは `read_line` のローカル変数で、`history.len()` が
//! 「編集中の行」を意味する。↑は 0 で止まり、↓で最新を越えると空行になる。
//! [`History`] へのアクセスは読み取りのみで、エディタが書き換えるのは
//! 自分のバッファとこのカーソルだけ。

use crate::history::History;

// ── raw モードガード ──────────────────────────────────────────────

/// termios を raw モードへ切り替え、スコープを抜けるときに元へ戻すガード。
///
/// エコーと行バッファリング（ECHO / ICANON）をカーネルから引き取り、
/// ISIG も切って ^C / ^Z をキー入力として受け取る。出力側の OPOST は
/// 残し、`\n` → `\r\n` の変換はターミナルに任せる。
struct RawGuard {
    fd: i32,
    saved: libc::termios,
}

impl RawGuard {
    /// 現在の設定を `tcgetattr` で控えてから raw モードを適用する。
    fn activate(fd: i32) -> Self {
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        unsafe {
            libc::tcgetattr(fd, &mut saved);
        }

        let mut raw = saved;
        // 入力: CR→LF 変換とフロー制御を止め、8 ビットをそのまま通す
        raw.c_iflag &= !(libc::ICRNL | libc::IXON | libc::BRKINT | libc::INPCK | libc::ISTRIP);
        raw.c_cflag |= libc::CS8;
        // ローカル: エコー・行編集・シグナル生成・拡張処理をすべて切る
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::ISIG | libc::IEXTEN);
        // 1 バイト届き次第 read が返る
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        unsafe {
            libc::tcsetattr(fd, libc::TCSAFLUSH, &raw);
        }
        Self { fd, saved }
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        // 控えておいた設定をそのまま書き戻す
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.saved);
        }
    }
}

// ── キー入力 ──────────────────────────────────────────────────────

/// 1 キー分の入力。バイト列から解釈した後の表現。
pub enum Key {
    /// 印字可能文字（ASCII / UTF-8 マルチバイト）。
    Char(char),
    /// CR / LF。行の確定。
    Enter,
    /// DEL (0x7f) / BS (0x08)。カーソル左の 1 文字を消す。
    Backspace,
    /// `ESC [ 3 ~`。カーソル位置の 1 文字を消す。
    Delete,
    /// `ESC [ D`。
    Left,
    /// `ESC [ C`。
    Right,
    /// `ESC [ A`。履歴を 1 つ遡る。
    Up,
    /// `ESC [ B`。履歴を 1 つ進める。
    Down,
    /// `ESC [ H` / `ESC [ 1 ~`。
    Home,
    /// `ESC [ F` / `ESC [ 4 ~`。
    End,
    /// 0x01。行頭へ。
    CtrlA,
    /// 0x03。編集中の行を捨てて新しいプロンプトへ。
    CtrlC,
    /// 0x04。バッファが空なら EOF。
    CtrlD,
    /// 0x05。行末へ。
    CtrlE,
    /// 0x0b。カーソルから行末までを消す。
    CtrlK,
    /// 0x0c。画面クリア。
    CtrlL,
    /// 0x15。行頭からカーソルまでを消す。
    CtrlU,
    /// 0x17。直前の単語を消す。
    CtrlW,
    /// 解釈できなかった入力。読み飛ばす。
    Unknown,
}

/// 1 バイト読む。EOF / エラーは `None`。
fn read_byte(fd: i32) -> Option<u8> {
    let mut b: u8 = 0;
    let n = unsafe { libc::read(fd, &mut b as *mut u8 as *mut libc::c_void, 1) };
    (n == 1).then_some(b)
}

/// ESC の後続を解釈する。
///
/// ESC 単打とシーケンスを区別するため、後続バイトの有無を
/// `poll(50ms)` で確かめる。`[N~` 形式は `~` まで読み切ってから N で
/// 分岐するので、未対応のシーケンスでも残りバイトが入力に化けない。
fn read_escape_seq(fd: i32) -> Key {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    if unsafe { libc::poll(&mut pfd, 1, 50) } <= 0 {
        return Key::Unknown; // ESC 単打
    }

    if read_byte(fd) != Some(b'[') {
        return Key::Unknown;
    }

    match read_byte(fd) {
        Some(b'A') => Key::Up,
        Some(b'B') => Key::Down,
        Some(b'C') => Key::Right,
        Some(b'D') => Key::Left,
        Some(b'H') => Key::Home,
        Some(b'F') => Key::End,
        Some(d @ b'0'..=b'9') => {
            let mut num = u32::from(d - b'0');
            loop {
                match read_byte(fd) {
                    Some(d @ b'0'..=b'9') => num = num * 10 + u32::from(d - b'0'),
                    Some(b'~') => break,
                    _ => return Key::Unknown,
                }
            }
            match num {
                1 => Key::Home,
                3 => Key::Delete,
                4 => Key::End,
                _ => Key::Unknown,
            }
        }
        _ => Key::Unknown,
    }
}

/// UTF-8 の続きバイトを読み足して 1 文字にする。
///
/// `first` は先頭バイト、`total` は先頭バイトから判定した全バイト数。
/// 足りない・壊れている場合は `Key::Unknown`。
fn read_utf8(fd: i32, first: u8, total: usize) -> Key {
    let mut seq = [first, 0, 0, 0];
    for i in 1..total {
        match read_byte(fd) {
            Some(b) => seq[i] = b,
            None => return Key::Unknown,
        }
    }
    match std::str::from_utf8(&seq[..total]) {
        Ok(s) => s.chars().next().map_or(Key::Unknown, Key::Char),
        Err(_) => Key::Unknown,
    }
}

/// 次の 1 キーを読む。`None` は入力の終端。
fn read_key(fd: i32) -> Option<Key> {
    let byte = read_byte(fd)?;

    Some(match byte {
        b'\r' | b'\n' => Key::Enter,
        0x7f | 0x08 => Key::Backspace,
        0x1b => read_escape_seq(fd),
        1 => Key::CtrlA,
        3 => Key::CtrlC,
        4 => Key::CtrlD,
        5 => Key::CtrlE,
        11 => Key::CtrlK,
        12 => Key::CtrlL,
        21 => Key::CtrlU,
        23 => Key::CtrlW,
        b if (32..127).contains(&b) => Key::Char(b as char),
        b if b & 0xE0 == 0xC0 => read_utf8(fd, b, 2),
        b if b & 0xF0 == 0xE0 => read_utf8(fd, b, 3),
        b if b & 0xF8 == 0xF0 => read_utf8(fd, b, 4),
        _ => Key::Unknown,
    })
}

// ── LineEditor ────────────────────────────────────────────────────

/// 行エディタ本体。編集中のバッファとカーソルを持つ。
///
/// カーソルはバイトオフセット（常に UTF-8 文字境界上）。
/// 履歴は [`Shell`](crate::shell::Shell) が所有し、`read_line` の間だけ
/// 読み取り専用で借りる。
pub struct LineEditor {
    buf: String,
    cursor: usize,
    fd: i32,
}

impl LineEditor {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            cursor: 0,
            fd: libc::STDIN_FILENO,
        }
    }

    /// プロンプトを出して 1 行読む。Enter で `Some(行)`、
    /// EOF（空バッファでの Ctrl+D、または読み取り終端）で `None`。
    pub fn read_line(&mut self, prompt: &str, history: &History) -> Option<String> {
        self.buf.clear();
        self.cursor = 0;
        // 履歴カーソル。history.len() が「編集中の行」
        let mut history_index = history.len();

        let _guard = RawGuard::activate(self.fd);
        self.redraw(prompt);

        loop {
            let key = read_key(self.fd)?;
            match key {
                Key::Enter => {
                    term_write("\n");
                    return Some(self.buf.clone());
                }
                Key::CtrlD => {
                    if self.buf.is_empty() {
                        return None;
                    }
                    continue;
                }
                Key::CtrlC => {
                    term_write("^C\n");
                    self.buf.clear();
                    self.cursor = 0;
                    history_index = history.len();
                    self.redraw(prompt);
                    continue;
                }
                Key::Char(ch) => self.insert_char(ch),
                Key::Backspace => self.backspace(),
                Key::Delete => self.delete_forward(),
                Key::Left => self.cursor_left(),
                Key::Right => self.cursor_right(),
                Key::Home | Key::CtrlA => self.cursor = 0,
                Key::End | Key::CtrlE => self.cursor = self.buf.len(),
                Key::Up => self.history_prev(history, &mut history_index),
                Key::Down => self.history_next(history, &mut history_index),
                Key::CtrlK => self.kill_tail(),
                Key::CtrlU => self.kill_head(),
                Key::CtrlW => self.kill_prev_word(),
                Key::CtrlL => {
                    term_write("\x1b[2J\x1b[1;1H");
                    self.redraw(prompt);
                    continue;
                }
                Key::Unknown => continue,
            }
            self.redraw(prompt);
        }
    }

    // ── カーソル境界 ──────────────────────────────────────────────

    /// カーソルの 1 文字手前の文字境界。行頭なら 0。
    fn prev_boundary(&self) -> usize {
        let mut i = self.cursor.saturating_sub(1);
        while i > 0 && !self.buf.is_char_boundary(i) {
            i -= 1;
        }
        i
    }

    /// カーソルの 1 文字先の文字境界。行末なら `buf.len()`。
    fn next_boundary(&self) -> usize {
        let mut i = (self.cursor + 1).min(self.buf.len());
        while i < self.buf.len() && !self.buf.is_char_boundary(i) {
            i += 1;
        }
        i
    }

    // ── バッファ編集 ──────────────────────────────────────────────

    /// カーソル位置へ 1 文字入れて、その直後へ進む。
    fn insert_char(&mut self, ch: char) {
        self.buf.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    /// Backspace。行頭なら何もしない。
    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let at = self.prev_boundary();
        self.buf.remove(at);
        self.cursor = at;
    }

    /// Delete。行末なら何もしない。
    fn delete_forward(&mut self) {
        if self.cursor < self.buf.len() {
            self.buf.remove(self.cursor);
        }
    }

    fn cursor_left(&mut self) {
        if self.cursor > 0 {
            self.cursor = self.prev_boundary();
        }
    }

    fn cursor_right(&mut self) {
        self.cursor = self.next_boundary();
    }

    /// Ctrl+K。カーソルから行末までを捨てる。
    fn kill_tail(&mut self) {
        self.buf.truncate(self.cursor);
    }

    /// Ctrl+U。行頭からカーソルまでを捨てる。
    fn kill_head(&mut self) {
        self.buf = self.buf.split_off(self.cursor);
        self.cursor = 0;
    }

    /// Ctrl+W。カーソル直前の連続空白とその手前の単語をまとめて捨てる。
    fn kill_prev_word(&mut self) {
        let head = &self.buf[..self.cursor];
        let without_spaces = head.trim_end_matches(' ');
        let word_start = without_spaces.rfind(' ').map_or(0, |i| i + 1);
        self.buf.replace_range(word_start..self.cursor, "");
        self.cursor = word_start;
    }

    // ── 履歴ナビゲーション ────────────────────────────────────────

    /// ↑: 履歴を一つ遡る。先頭（インデックス 0）で停止する。
    fn history_prev(&mut self, history: &History, history_index: &mut usize) {
        if *history_index > 0 {
            *history_index -= 1;
            if let Some(entry) = history.get(*history_index) {
                self.buf = entry.to_string();
                self.cursor = self.buf.len();
            }
        }
    }

    /// ↓: 履歴を一つ進む。最新エントリを越えたら空バッファになる。
    fn history_next(&mut self, history: &History, history_index: &mut usize) {
        if *history_index < history.len() {
            *history_index += 1;
            match history.get(*history_index) {
                Some(entry) => {
                    self.buf = entry.to_string();
                    self.cursor = self.buf.len();
                }
                None => {
                    self.buf.clear();
                    self.cursor = 0;
                }
            }
        }
    }

    // ── 描画 ──────────────────────────────────────────────────────

    /// プロンプトとバッファで行全体を描き直す。
    ///
    /// `\r` で行頭へ戻り、全体を書いてから `\x1b[K` で右側の残骸を消す。
    /// カーソルが行末以外なら `\x1b[ND` で戻す。1 回の write にまとめるのは
    /// フリッカー対策。カーソル幅は文字数で数える（バイト数ではない）。
    fn redraw(&self, prompt: &str) {
        let tail = self.buf[self.cursor..].chars().count();
        let mut frame = format!("\r{}{}\x1b[K", prompt, self.buf);
        if tail > 0 {
            frame.push_str(&format!("\x1b[{}D", tail));
        }
        term_write(&frame);
    }
}

/// stdout の fd へ直接書く。Rust 側のバッファリングを通さない。
fn term_write(s: &str) {
    let mut rest = s.as_bytes();
    while !rest.is_empty() {
        let n = unsafe {
            libc::write(
                libc::STDOUT_FILENO,
                rest.as_ptr() as *const libc::c_void,
                rest.len(),
            )
        };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_with(buf: &str, cursor: usize) -> LineEditor {
        LineEditor {
            buf: buf.to_string(),
            cursor,
            fd: libc::STDIN_FILENO,
        }
    }

    #[test]
    fn insert_appends_and_advances() {
        let mut ed = editor_with("", 0);
        for ch in "abc".chars() {
            ed.insert_char(ch);
        }
        assert_eq!(ed.buf, "abc");
        assert_eq!(ed.cursor, 3);
    }

    #[test]
    fn insert_in_middle_shifts_tail() {
        let mut ed = editor_with("ad", 1);
        ed.insert_char('b');
        ed.insert_char('c');
        assert_eq!(ed.buf, "abcd");
        assert_eq!(ed.cursor, 3);
    }

    #[test]
    fn backspace_removes_before_cursor() {
        let mut ed = editor_with("abc", 2);
        ed.backspace();
        assert_eq!(ed.buf, "ac");
        assert_eq!(ed.cursor, 1);
    }

    #[test]
    fn backspace_at_start_is_noop() {
        let mut ed = editor_with("abc", 0);
        ed.backspace();
        assert_eq!(ed.buf, "abc");
        assert_eq!(ed.cursor, 0);
    }

    #[test]
    fn delete_forward_removes_at_cursor() {
        let mut ed = editor_with("abc", 1);
        ed.delete_forward();
        assert_eq!(ed.buf, "ac");
        assert_eq!(ed.cursor, 1);

        ed.cursor = 2;
        ed.delete_forward(); // 行末では no-op
        assert_eq!(ed.buf, "ac");
    }

    #[test]
    fn cursor_moves_stay_in_bounds() {
        let mut ed = editor_with("ab", 0);
        ed.cursor_left(); // 行頭で no-op
        assert_eq!(ed.cursor, 0);
        ed.cursor_right();
        ed.cursor_right();
        assert_eq!(ed.cursor, 2);
        ed.cursor_right(); // 行末で no-op
        assert_eq!(ed.cursor, 2);
    }

    #[test]
    fn kill_tail_truncates() {
        let mut ed = editor_with("hello world", 5);
        ed.kill_tail();
        assert_eq!(ed.buf, "hello");
        assert_eq!(ed.cursor, 5);
    }

    #[test]
    fn kill_head_keeps_tail() {
        let mut ed = editor_with("hello world", 6);
        ed.kill_head();
        assert_eq!(ed.buf, "world");
        assert_eq!(ed.cursor, 0);
    }

    #[test]
    fn kill_prev_word_takes_word_and_spaces() {
        let mut ed = editor_with("echo hello world", 16);
        ed.kill_prev_word();
        assert_eq!(ed.buf, "echo hello ");
        assert_eq!(ed.cursor, 11);

        let mut ed = editor_with("echo   hello", 12);
        ed.kill_prev_word();
        assert_eq!(ed.buf, "echo   ");
        assert_eq!(ed.cursor, 7);

        let mut ed = editor_with("word", 0);
        ed.kill_prev_word(); // 行頭で no-op
        assert_eq!(ed.buf, "word");
    }

    #[test]
    fn multibyte_cursor_and_delete() {
        let mut ed = editor_with("", 0);
        ed.insert_char('ね');
        ed.insert_char('こ');
        assert_eq!(ed.cursor, 6); // 3 バイト × 2

        ed.cursor_left();
        assert_eq!(ed.cursor, 3);
        ed.backspace();
        assert_eq!(ed.buf, "こ");
        assert_eq!(ed.cursor, 0);
        ed.cursor_right();
        assert_eq!(ed.cursor, 3);
    }

    // ── 履歴カーソル ──

    fn history_of(entries: &[&str]) -> History {
        let mut h = History::new_for_test();
        for e in entries {
            h.append(e);
        }
        h
    }

    #[test]
    fn up_recalls_newest_first_and_stops_at_oldest() {
        let h = history_of(&["first", "second"]);
        let mut ed = editor_with("", 0);
        let mut idx = h.len();

        ed.history_prev(&h, &mut idx);
        assert_eq!(ed.buf, "second");
        ed.history_prev(&h, &mut idx);
        assert_eq!(ed.buf, "first");
        ed.history_prev(&h, &mut idx);
        assert_eq!((ed.buf.as_str(), idx), ("first", 0));
    }

    #[test]
    fn down_past_newest_clears_buffer() {
        let h = history_of(&["first", "second"]);
        let mut ed = editor_with("", 0);
        let mut idx = h.len();

        ed.history_prev(&h, &mut idx);
        ed.history_next(&h, &mut idx);
        assert_eq!(ed.buf, "");
        assert_eq!(idx, h.len());

        ed.history_next(&h, &mut idx); // 末尾では no-op
        assert_eq!(ed.buf, "");
        assert_eq!(idx, h.len());
    }
}

//! ジョブテーブルとジョブ制御。
//!
//! パイプライン 1 本 = ジョブ 1 件。ジョブはプロセスグループ単位で管理し、
//! `waitpid` が返す状態変化をプロセスごとの [`ProcState`] として蓄積する。
//! ジョブ全体の Running / Stopped / Done はその場で導出する（保存しない）。
//!
//! executor（起動・フォアグラウンド待機）と builtins（`jobs`/`fg`/`bg`/`kill`）の
//! 両方から使うため、独立モジュールに置く。テーブルへの書き込みはすべて
//! メインループ側で行い、シグナルハンドラからは触らない
//! （[`signal`](crate::signal) の self-pipe 参照）。

use std::fmt;

use libc::pid_t;

// ── プロセス状態 ─────────────────────────────────────────────────────

/// パイプライン内の 1 プロセスの状態。`waitpid` の結果から遷移する。
#[derive(Clone, Copy, PartialEq)]
enum ProcState {
    /// 実行中（または SIGCONT で再開済み）。
    Alive,
    /// SIGTSTP / SIGSTOP 等で停止中。
    Stopped,
    /// 終了。raw な wait status を保持する。
    Exited(i32),
}

impl ProcState {
    /// `waitpid` の raw status から次の状態を決める。
    fn from_wait(raw: i32) -> Self {
        if libc::WIFSTOPPED(raw) {
            ProcState::Stopped
        } else if libc::WIFCONTINUED(raw) {
            ProcState::Alive
        } else {
            ProcState::Exited(raw)
        }
    }
}

/// raw な wait status を慣例的な終了コードに直す（シグナル死は 128+N）。
fn exit_code(raw: i32) -> i32 {
    if libc::WIFEXITED(raw) {
        libc::WEXITSTATUS(raw)
    } else if libc::WIFSIGNALED(raw) {
        128 + libc::WTERMSIG(raw)
    } else {
        1
    }
}

/// ジョブ内の 1 プロセス。
struct Proc {
    pid: pid_t,
    state: ProcState,
}

// ── ジョブ ───────────────────────────────────────────────────────────

/// ジョブ全体の集約状態。
#[derive(Debug, PartialEq)]
pub enum JobStatus {
    Running,
    Stopped,
    /// 全プロセス終了。値はパイプライン最終段の終了コード。
    Done(i32),
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done(_) => "Done",
        })
    }
}

/// 起動済みパイプライン 1 本分の記録。
pub struct Job {
    /// `[N]` 表示に使う番号。削除後は再利用される。
    pub id: usize,
    /// プロセスグループ ID（= 先頭プロセスの pid）。シグナルと waitpid の宛先。
    pub pgid: pid_t,
    /// 入力行から `&` を除いた表示用文字列。
    pub cmdline: String,
    /// パイプラインの各段。先頭から実行順。
    procs: Vec<Proc>,
}

impl Job {
    /// 集約状態を導出する。
    ///
    /// 停止中のプロセスが 1 つでもあれば Stopped。全員終了していれば Done で、
    /// 終了コードは最終段のもの。それ以外は Running。
    pub fn status(&self) -> JobStatus {
        let mut running = 0usize;
        let mut last_code = 0;
        for p in &self.procs {
            match p.state {
                ProcState::Stopped => return JobStatus::Stopped,
                ProcState::Alive => running += 1,
                ProcState::Exited(raw) => last_code = exit_code(raw),
            }
        }
        if running == 0 {
            JobStatus::Done(last_code)
        } else {
            JobStatus::Running
        }
    }

    /// `fg` / `bg` の再開時に呼ぶ。停止中のプロセスだけを Alive に戻す
    /// （終了済みのものはそのまま）。
    pub fn mark_resumed(&mut self) {
        for p in &mut self.procs {
            if p.state == ProcState::Stopped {
                p.state = ProcState::Alive;
            }
        }
    }
}

// ── JobTable ─────────────────────────────────────────────────────────

/// 生きているジョブの一覧。常に ID 昇順を保つ。
///
/// [`Shell`](crate::shell::Shell) が所有する。挿入・削除・検索はすべて
/// メインスレッドから行われる。
pub struct JobTable {
    entries: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// `id` を持つジョブの位置。
    fn index_of(&self, id: usize) -> Option<usize> {
        self.entries.iter().position(|j| j.id == id)
    }

    /// 起動したパイプラインを登録し、割り当てた ID を返す。
    ///
    /// ID は最小の空き番号。`entries` が昇順なので、先頭から連番が途切れた
    /// 位置が空き番号であり、そこが挿入位置にもなる。
    pub fn register(&mut self, pgid: pid_t, cmdline: String, pids: Vec<pid_t>) -> usize {
        let mut id = 1;
        let mut slot = 0;
        for j in &self.entries {
            if j.id != id {
                break;
            }
            id += 1;
            slot += 1;
        }

        let procs = pids
            .into_iter()
            .map(|pid| Proc {
                pid,
                state: ProcState::Alive,
            })
            .collect();
        self.entries.insert(
            slot,
            Job {
                id,
                pgid,
                cmdline,
                procs,
            },
        );
        id
    }

    /// ID で検索する。
    pub fn get(&self, id: usize) -> Option<&Job> {
        self.index_of(id).map(|i| &self.entries[i])
    }

    /// ID で検索する（可変）。
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.index_of(id).map(|i| &mut self.entries[i])
    }

    /// プロセスグループ ID で検索する。
    pub fn by_pgid(&self, pgid: pid_t) -> Option<&Job> {
        self.entries.iter().find(|j| j.pgid == pgid)
    }

    /// ID を指定して取り除く。
    pub fn remove(&mut self, id: usize) {
        if let Some(i) = self.index_of(id) {
            self.entries.remove(i);
        }
    }

    /// 最も新しい（= ID 最大の）未終了ジョブ。引数なしの `fg` / `bg` が使う。
    pub fn latest_live(&self) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|j| !matches!(j.status(), JobStatus::Done(_)))
            .map(|j| j.id)
    }

    /// `waitpid` が報告した 1 プロセス分の状態変化を取り込む。
    ///
    /// pid がどのジョブにも属さない場合（登録前に失敗したパイプラインの残骸や
    /// コマンド置換の子）は黙って捨てる。
    pub fn record_wait_status(&mut self, pid: pid_t, raw: i32) {
        let next = ProcState::from_wait(raw);
        for job in &mut self.entries {
            if let Some(p) = job.procs.iter_mut().find(|p| p.pid == pid) {
                p.state = next;
                return;
            }
        }
    }

    /// 全ジョブを ID 昇順で辿る。
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.entries.iter()
    }
}

// ── フォアグラウンド待機 ─────────────────────────────────────────────

/// フォアグラウンド待機の結末。
pub enum FgWait {
    /// 全段が終了した。値は最終段の終了コード。
    Finished(i32),
    /// いずれかの段が停止した（Ctrl+Z 等）。ジョブはテーブルに残る。
    Suspended,
}

/// ジョブが待機を打ち切れる状態に達していれば、その結末を返す。
fn settled(jobs: &JobTable, pgid: pid_t) -> Option<FgWait> {
    match jobs.by_pgid(pgid)?.status() {
        JobStatus::Stopped => Some(FgWait::Suspended),
        JobStatus::Done(code) => Some(FgWait::Finished(code)),
        JobStatus::Running => None,
    }
}

/// フォアグラウンドのプロセスグループを同期的に待つ。
///
/// `waitpid(-pgid, WUNTRACED)` を繰り返し、報告された状態変化を 1 件ずつ
/// テーブルへ取り込みながら、ジョブ全体が終了または停止するまでブロックする。
/// `EINTR` は読み直し、`ECHILD`（全員 reap 済み）はテーブルの状態から結末を
/// 決める。ターミナルの受け渡しは呼び出し側の責任。
pub fn wait_foreground(jobs: &mut JobTable, pgid: pid_t) -> FgWait {
    loop {
        let mut raw = 0i32;
        let pid = unsafe { libc::waitpid(-pgid, &mut raw, libc::WUNTRACED) };

        if pid > 0 {
            jobs.record_wait_status(pid, raw);
            if let Some(outcome) = settled(jobs, pgid) {
                return outcome;
            }
            continue;
        }

        let interrupted = pid < 0
            && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR);
        if !interrupted {
            break;
        }
    }

    settled(jobs, pgid).unwrap_or(FgWait::Finished(0))
}

// ── reap と通知 ──────────────────────────────────────────────────────

/// 溜まっている子プロセスの状態変化を非ブロッキングで取り込む。
///
/// プロンプト表示前と各パイプライン実行前に呼ばれる。テーブル未登録の
/// pid も reap されるので、ゾンビは残らない。
pub fn reap_pending(jobs: &mut JobTable) {
    let mut raw = 0i32;
    loop {
        let pid = unsafe {
            libc::waitpid(
                -1,
                &mut raw,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if pid <= 0 {
            return;
        }
        jobs.record_wait_status(pid, raw);
    }
}

/// 終了したバックグラウンドジョブを報告してテーブルから外す。
///
/// プロンプト表示の直前にだけ呼ぶ。行編集の途中に通知が割り込まないのは
/// このタイミング制約による。
pub fn report_finished(jobs: &mut JobTable) {
    let finished: Vec<usize> = jobs
        .iter()
        .filter(|j| matches!(j.status(), JobStatus::Done(_)))
        .map(|j| j.id)
        .collect();

    for id in finished {
        if let Some(j) = jobs.get(id) {
            eprintln!("[{}]   Done   {}", j.id, j.cmdline);
        }
        jobs.remove(id);
    }
}

// ── ターミナル所有権 ─────────────────────────────────────────────────

/// ターミナルのフォアグラウンドプロセスグループを付け替える。
///
/// ジョブへ渡すときも、待機後にシェル自身（`shell_pgid`）へ戻すときも
/// これを使う。渡した呼び出しには必ず戻す呼び出しを対にすること。
/// シェルは SIGTTOU を無視しているため、この操作で止まることはない。
pub fn set_foreground_pgrp(fd: i32, pgid: pid_t) {
    unsafe {
        libc::tcsetpgrp(fd, pgid);
    }
}

// ── Tests ───────────────────────────────────────────────────────────

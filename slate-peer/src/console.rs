//! Line console standing in for the whiteboard window.
//!
//! Reads one command per line from stdin while printing peer events as they
//! arrive. The selected board is redrawn on a [`TerminalCanvas`] whenever it
//! changes.

use std::io::Write;

use slate_collab::{PeerEvent, ProposalOutcome, WhiteboardPeer};
use slate_core::{BoardId, Canvas, EncodedPath, Path, PathColor, Point};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Console commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    Share(BoardRef),
    Unshare(BoardRef),
    Open(BoardRef),
    Close(BoardRef),
    Select(BoardRef),
    Draw(Path),
    Undo,
    Clear,
    Delete,
    Show,
    Help,
    Quit,
}

/// A board named on the command line: a full id or an index into the last
/// `list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardRef {
    Id(BoardId),
    Index(usize),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let board = |arg: Option<&str>| -> Result<BoardRef, String> {
            let arg = arg.ok_or_else(|| format!("`{verb}` needs a board"))?;
            if let Ok(index) = arg.parse::<usize>() {
                return Ok(BoardRef::Index(index));
            }
            BoardId::parse(arg).map(BoardRef::Id).map_err(|e| e.to_string())
        };

        let command = match verb {
            "new" => Command::New,
            "list" | "ls" => Command::List,
            "share" => Command::Share(board(words.next())?),
            "unshare" => Command::Unshare(board(words.next())?),
            "open" => Command::Open(board(words.next())?),
            "close" => Command::Close(board(words.next())?),
            "select" => Command::Select(board(words.next())?),
            "draw" => {
                let color: PathColor = words
                    .next()
                    .ok_or("`draw` needs a color")?
                    .parse()
                    .map_err(|e: slate_core::BoardError| e.to_string())?;
                let points = words
                    .map(str::parse::<Point>)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?;
                if points.is_empty() {
                    return Err("`draw` needs at least one point".to_string());
                }
                Command::Draw(Path::new(color, points))
            }
            "undo" => Command::Undo,
            "clear" => Command::Clear,
            "delete" => Command::Delete,
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command `{other}`")),
        };
        Ok(command)
    }
}

const HELP: &str = "\
commands:
  new                     create a board
  list                    list owned, viewed and available boards
  share <board>           announce an owned board
  unshare <board>         withdraw an owned board
  open <board>            view a remote board
  close <board>           stop viewing a remote board
  select <board>          pick the board edits go to
  draw <color> x,y ...    add a path (black, red or #rrggbb)
  undo | clear | delete   act on the selected board
  show                    redraw the selected board
  quit";

/// Prints boards as text, one line per path.
pub struct TerminalCanvas<W: Write> {
    out: W,
}

impl<W: Write> TerminalCanvas<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Canvas for TerminalCanvas<W> {
    fn clear(&mut self) {
        let _ = writeln!(self.out, "---");
    }

    fn draw(&mut self, paths: &[EncodedPath]) {
        if paths.is_empty() {
            let _ = writeln!(self.out, "  (empty)");
        }
        for (i, encoded) in paths.iter().enumerate() {
            let line = match Path::decode(encoded) {
                Ok(path) => {
                    let points: Vec<String> = path.points.iter().map(|p| format!("({},{})", p.x, p.y)).collect();
                    format!("  {i:>3} {:<8} {}", path.color.to_string(), points.join(" "))
                }
                Err(_) => format!("  {i:>3} {encoded}"),
            };
            let _ = writeln!(self.out, "{line}");
        }
        let _ = self.out.flush();
    }
}

/// Interactive session over one peer.
pub struct Console {
    peer: WhiteboardPeer,
    selected: Option<BoardId>,
    listing: Vec<BoardId>,
    canvas: TerminalCanvas<std::io::Stdout>,
}

impl Console {
    pub fn new(peer: WhiteboardPeer) -> Self {
        Self {
            peer,
            selected: None,
            listing: Vec::new(),
            canvas: TerminalCanvas::new(std::io::stdout()),
        }
    }

    /// Run until `quit` or end of input.
    pub async fn run(mut self, mut events: mpsc::Receiver<PeerEvent>) -> Result<(), Box<dyn std::error::Error>> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("peer at {}:{}, type `help`", self.peer.host(), self.peer.port());

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.execute(command).await,
                        Err(e) => println!("error: {e}"),
                    }
                }
                Some(event) = events.recv() => self.on_event(event).await,
            }
        }

        self.peer.shutdown().await;
        Ok(())
    }

    fn resolve(&self, board: BoardRef) -> Result<BoardId, String> {
        match board {
            BoardRef::Id(id) => Ok(id),
            BoardRef::Index(i) => self
                .listing
                .get(i)
                .cloned()
                .ok_or_else(|| format!("no board #{i}; run `list` first")),
        }
    }

    fn selected(&self) -> Result<BoardId, String> {
        self.selected.clone().ok_or_else(|| "no board selected".to_string())
    }

    async fn execute(&mut self, command: Command) {
        if let Err(e) = self.try_execute(command).await {
            println!("error: {e}");
        }
    }

    async fn try_execute(&mut self, command: Command) -> Result<(), String> {
        let peer = self.peer.clone();
        match command {
            Command::New => {
                let id = peer.create_board().await;
                println!("created {id}");
                self.selected = Some(id);
            }
            Command::List => self.list().await,
            Command::Share(board) => {
                let id = self.resolve(board)?;
                peer.set_shared(&id, true).await.map_err(|e| e.to_string())?;
            }
            Command::Unshare(board) => {
                let id = self.resolve(board)?;
                peer.set_shared(&id, false).await.map_err(|e| e.to_string())?;
            }
            Command::Open(board) => {
                let id = self.resolve(board)?;
                peer.open_board(&id).await.map_err(|e| e.to_string())?;
                self.selected = Some(id);
            }
            Command::Close(board) => {
                let id = self.resolve(board)?;
                peer.close_board(&id).await.map_err(|e| e.to_string())?;
                if self.selected.as_ref() == Some(&id) {
                    self.selected = None;
                }
            }
            Command::Select(board) => {
                let id = self.resolve(board)?;
                peer.board(&id).await.map_err(|e| e.to_string())?;
                self.selected = Some(id);
                self.show().await?;
            }
            Command::Draw(path) => {
                let id = self.selected()?;
                let outcome = peer.add_path(&id, path.encode()).await.map_err(|e| e.to_string())?;
                self.report(outcome);
            }
            Command::Undo => {
                let id = self.selected()?;
                let outcome = peer.undo(&id).await.map_err(|e| e.to_string())?;
                self.report(outcome);
            }
            Command::Clear => {
                let id = self.selected()?;
                let outcome = peer.clear(&id).await.map_err(|e| e.to_string())?;
                self.report(outcome);
            }
            Command::Delete => {
                let id = self.selected()?;
                peer.delete_board(&id).await.map_err(|e| e.to_string())?;
                self.selected = None;
                println!("deleted {id}");
            }
            Command::Show => self.show().await?,
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn report(&self, outcome: ProposalOutcome) {
        match outcome {
            ProposalOutcome::Accepted { version } => log::debug!("accepted at version {version}"),
            ProposalOutcome::Rejected { current_version } => {
                println!("rejected: board moved on to version {current_version}")
            }
            ProposalOutcome::Forwarded => log::debug!("sent to owner"),
        }
    }

    async fn list(&mut self) {
        let boards = self.peer.boards().await;
        let available: Vec<BoardId> = self
            .peer
            .available_boards()
            .await
            .into_iter()
            .filter(|id| !boards.contains(id))
            .collect();

        self.listing.clear();
        for id in boards {
            let mark = if self.selected.as_ref() == Some(&id) { '*' } else { ' ' };
            let (version, state) = match self.peer.board(&id).await {
                Ok(b) if b.is_owned() && b.is_shared() => (b.version(), "owned, shared"),
                Ok(b) if b.is_owned() => (b.version(), "owned"),
                Ok(b) => (b.version(), "view"),
                Err(_) => continue,
            };
            println!("{mark}{:>3} {id} v{version} ({state})", self.listing.len());
            self.listing.push(id);
        }
        for id in available {
            println!(" {:>3} {id} (available)", self.listing.len());
            self.listing.push(id);
        }
        if self.listing.is_empty() {
            println!("no boards");
        }
    }

    async fn show(&mut self) -> Result<(), String> {
        let id = self.selected()?;
        let board = self.peer.board(&id).await.map_err(|e| e.to_string())?;
        println!("{id} v{}", board.version());
        board.draw(&mut self.canvas);
        Ok(())
    }

    async fn on_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::BoardUpdated { id, .. } => {
                if self.selected.as_ref() == Some(&id) {
                    let _ = self.show().await;
                }
            }
            PeerEvent::BoardAvailable(id) => println!("available: {id}"),
            PeerEvent::BoardWithdrawn(id) => println!("withdrawn: {id}"),
            PeerEvent::BoardDiscarded(id) => {
                println!("discarded: {id}");
                if self.selected.as_ref() == Some(&id) {
                    self.selected = None;
                }
            }
            PeerEvent::RemoteError { remote, message } => println!("error from {remote}: {message}"),
            PeerEvent::SessionClosed { remote } => log::info!("session with {remote} closed"),
        }
    }
}

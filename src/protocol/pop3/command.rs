/// POP3 command as defined in RFC 1939, plus CAPA from RFC 2449.
///
/// Arguments are kept as raw text; each handler validates its own so that a
/// malformed argument can still be reported with the right phase check first.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Authorization state
    User(Option<String>),
    Pass(Option<String>),
    Apop,

    // Transaction state
    Stat,
    List(Option<String>),
    Retr(Option<String>),
    Dele(Option<String>),
    Rset,
    Noop,
    Top(Option<String>),
    Uidl(Option<String>),

    // Any state
    Capa,
    Quit,

    Unknown(String),
}

impl Command {
    /// Splits a command line into verb and argument. Verbs are
    /// case-insensitive; the argument is everything after the first space.
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, rest)) => {
                let rest = rest.trim();
                (verb, if rest.is_empty() { None } else { Some(rest.to_string()) })
            }
            None => (line.trim(), None),
        };

        match verb.to_ascii_uppercase().as_str() {
            "USER" => Command::User(arg),
            "PASS" => Command::Pass(arg),
            "APOP" => Command::Apop,
            "STAT" => Command::Stat,
            "LIST" => Command::List(arg),
            "RETR" => Command::Retr(arg),
            "DELE" => Command::Dele(arg),
            "RSET" => Command::Rset,
            "NOOP" => Command::Noop,
            "TOP" => Command::Top(arg),
            "UIDL" => Command::Uidl(arg),
            "CAPA" => Command::Capa,
            "QUIT" => Command::Quit,
            _ => Command::Unknown(verb.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Command::User(_) => "USER",
            Command::Pass(_) => "PASS",
            Command::Apop => "APOP",
            Command::Stat => "STAT",
            Command::List(_) => "LIST",
            Command::Retr(_) => "RETR",
            Command::Dele(_) => "DELE",
            Command::Rset => "RSET",
            Command::Noop => "NOOP",
            Command::Top(_) => "TOP",
            Command::Uidl(_) => "UIDL",
            Command::Capa => "CAPA",
            Command::Quit => "QUIT",
            Command::Unknown(verb) => verb,
        }
    }
}

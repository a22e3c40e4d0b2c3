//! End-to-end pipeline tests: NDJSON input -> composition -> SMTP delivery
//! against an in-process scripted SMTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use logmailer::config::Config;
use logmailer::{EmitSummary, MailOutput, input};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Scripted SMTP server
// =============================================================================

/// What the server observed on one connection.
#[derive(Debug, Clone, Default)]
struct SessionLog {
    index: usize,
    commands: Vec<String>,
    /// Message content with dot-stuffing removed, without the final CRLF.
    data: Option<String>,
}

struct ScriptedServer {
    port: u16,
    sessions: Arc<Mutex<Vec<SessionLog>>>,
}

impl ScriptedServer {
    /// Accept connections forever; DATA is rejected on the listed
    /// connection indices (0-based).
    async fn start(reject_data_on: Vec<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(Mutex::new(Vec::new()));

        let shared = sessions.clone();
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let reject = reject_data_on.contains(&index);
                tokio::spawn(handle_session(stream, index, reject, shared.clone()));
                index += 1;
            }
        });

        Self { port, sessions }
    }

    /// Wait until `count` sessions have closed, ordered by connection.
    async fn sessions(&self, count: usize) -> Vec<SessionLog> {
        for _ in 0..100 {
            {
                let sessions = self.sessions.lock().unwrap();
                if sessions.len() >= count {
                    let mut sessions = sessions.clone();
                    sessions.sort_by_key(|s| s.index);
                    return sessions;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} sessions, got {:?}",
            count,
            self.sessions.lock().unwrap()
        );
    }
}

async fn handle_session(
    stream: TcpStream,
    index: usize,
    reject_data: bool,
    sessions: Arc<Mutex<Vec<SessionLog>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut log = SessionLog {
        index,
        ..SessionLog::default()
    };

    let _ = write.write_all(b"220 localhost ESMTP scripted\r\n").await;

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        log.commands.push(command.clone());
        let upper = command.to_ascii_uppercase();

        let reply: &[u8] = if upper.starts_with("EHLO") {
            b"250-localhost\r\n250 8BITMIME\r\n"
        } else if upper.starts_with("MAIL FROM") || upper.starts_with("RCPT TO") {
            b"250 2.1.0 Ok\r\n"
        } else if upper == "DATA" {
            let _ = write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await;
            log.data = Some(read_data(&mut reader).await);
            if reject_data {
                b"554 5.7.1 Message rejected\r\n"
            } else {
                b"250 2.0.0 Ok: queued as TEST\r\n"
            }
        } else if upper == "QUIT" {
            let _ = write.write_all(b"221 2.0.0 Bye\r\n").await;
            break;
        } else {
            b"502 5.5.2 Command not recognized\r\n"
        };
        let _ = write.write_all(reply).await;
    }

    sessions.lock().unwrap().push(log);
}

async fn read_data<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
    let mut data = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == ".\r\n" {
            break;
        }
        let unstuffed = line.strip_prefix('.').unwrap_or(&line);
        data.push_str(unstuffed);
    }
    data.strip_suffix("\r\n").unwrap_or(&data).to_string()
}

// =============================================================================
// Helpers
// =============================================================================

fn output_for(port: u16, extra: &str) -> MailOutput {
    let yaml = format!(
        "mail:
  host: 127.0.0.1
  port: {port}
  domain: mailer.test
  from: Log Alerts <alerts@example.com>
  to: ops@example.com, oncall@example.com
  cc: \"\"
  bcc: audit@example.com
  time_locale: UTC
{extra}
input:
  batch_size: 10
  flush_interval: 1s
"
    );
    let config = Config::from_yaml(&yaml).unwrap();
    config.validate().unwrap();
    MailOutput::from_runtime(config.compile().unwrap()).unwrap()
}

async fn emit_lines(output: &MailOutput, lines: &str) -> EmitSummary {
    let totals = Arc::new(Mutex::new(EmitSummary::default()));
    let sink = totals.clone();
    let config = logmailer::config::InputConfig {
        batch_size: 10,
        flush_interval: Duration::from_secs(1),
    };

    input::run(
        BufReader::new(lines.as_bytes()),
        &config,
        CancellationToken::new(),
        move |batch| {
            let sink = sink.clone();
            async move {
                let summary = output.emit(&batch).await;
                let mut totals = sink.lock().unwrap();
                totals.sent += summary.sent;
                totals.failed += summary.failed;
                totals.skipped += summary.skipped;
            }
        },
    )
    .await
    .unwrap();

    let totals = *totals.lock().unwrap();
    totals
}

fn header<'a>(data: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{}: ", name);
    data.split("\r\n")
        .take_while(|l| !l.is_empty())
        .find_map(|l| l.strip_prefix(prefix.as_str()))
}

fn body(data: &str) -> &str {
    data.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn failing_message_does_not_stop_the_batch() {
    let server = ScriptedServer::start(vec![1]).await;
    let output = output_for(
        server.port,
        "  message: \"%s says %s\"\n  message_out_keys: tag, msg\n  subject: \"[%s]\"\n  subject_out_keys: tag",
    );

    let lines = concat!(
        "{\"tag\":\"app.log\",\"time\":1,\"record\":{\"msg\":\"first\"}}\n",
        "{\"tag\":\"app.log\",\"time\":2,\"record\":{\"msg\":\"second\"}}\n",
        "{\"tag\":\"app.log\",\"time\":3,\"record\":{\"msg\":\"third\"}}\n",
    );
    let summary = emit_lines(&output, lines).await;

    assert_eq!(
        summary,
        EmitSummary {
            sent: 2,
            failed: 1,
            skipped: 0
        }
    );

    let sessions = server.sessions(3).await;
    assert_eq!(sessions.len(), 3);
    for (i, expected) in ["first", "second", "third"].iter().enumerate() {
        let data = sessions[i].data.as_deref().expect("DATA not reached");
        assert_eq!(body(data), format!("app.log says {}", expected));
        assert_eq!(header(data, "Subject"), Some("[app.log]"));
        assert_eq!(
            sessions[i].commands.last().map(String::as_str),
            Some("QUIT"),
            "session {} not closed with QUIT: {:?}",
            i,
            sessions[i].commands
        );
    }
}

#[tokio::test]
async fn envelope_reaches_every_recipient_with_headers_in_order() {
    let server = ScriptedServer::start(vec![]).await;
    let output = output_for(server.port, "  out_keys: level, msg");

    let summary = emit_lines(
        &output,
        "{\"tag\":\"app\",\"time\":1,\"record\":{\"level\":\"error\",\"msg\":\"disk full\"}}\n",
    )
    .await;
    assert_eq!(summary.sent, 1);

    let sessions = server.sessions(1).await;
    let session = &sessions[0];

    assert_eq!(session.commands[0], "EHLO mailer.test");
    assert!(
        session.commands.iter().any(|c| c.starts_with("MAIL FROM:<alerts@example.com>")),
        "{:?}",
        session.commands
    );
    let rcpts: Vec<&str> = session
        .commands
        .iter()
        .filter(|c| c.starts_with("RCPT TO:"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        rcpts,
        vec![
            "RCPT TO:<ops@example.com>",
            "RCPT TO:<oncall@example.com>",
            "RCPT TO:<audit@example.com>",
        ]
    );
    // Anonymous session: no STARTTLS, no AUTH.
    assert!(!session.commands.iter().any(|c| c.starts_with("AUTH") || c == "STARTTLS"));

    let data = session.data.as_deref().unwrap();
    let names: Vec<&str> = data
        .split("\r\n")
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(": ").map(|(name, _)| name))
        .collect();
    assert_eq!(
        names,
        vec![
            "Date",
            "From",
            "To",
            "Cc",
            "Bcc",
            "Subject",
            "Message-Id",
            "Mime-Version",
            "Content-Type",
        ]
    );
    assert!(header(data, "Date").unwrap().ends_with("+0000"));
    assert_eq!(header(data, "To"), Some("ops@example.com, oncall@example.com"));
    assert_eq!(header(data, "Subject"), Some("logmailer notification"));
    assert_eq!(body(data), "level: error\r\nmsg: disk full");
}

#[tokio::test]
async fn body_lines_are_crlf_framed_and_dot_stuffed() {
    let server = ScriptedServer::start(vec![]).await;
    let output = output_for(
        server.port,
        "  message: \"%s\\\\n.hidden\\\\n..double\"\n  message_out_keys: msg",
    );

    let summary = emit_lines(
        &output,
        "{\"tag\":\"app\",\"time\":1,\"record\":{\"msg\":\"top\"}}\n",
    )
    .await;
    assert_eq!(summary.sent, 1);

    let sessions = server.sessions(1).await;
    let data = sessions[0].data.as_deref().unwrap();
    assert_eq!(body(data), "top\r\n.hidden\r\n..double");
}

#[tokio::test]
async fn unreachable_server_counts_every_message_as_failed() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let output = output_for(port, "  out_keys: msg");

    let lines = concat!(
        "{\"tag\":\"a\",\"time\":1,\"record\":{\"msg\":\"x\"}}\n",
        "{\"tag\":\"a\",\"time\":2,\"record\":{\"msg\":\"y\"}}\n",
    );
    let summary = emit_lines(&output, lines).await;

    assert_eq!(summary.sent, 0);
    assert_eq!(summary.failed, 2);
}

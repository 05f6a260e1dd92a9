use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use api::{AppConfig, Metrics, Services, init_tracing};
use query::{ConversationContext, ERROR_PREFIX, NO_ANSWER_NOTICE};

const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "종료"];

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);

    let services = Services::new(config, Metrics::new());
    let mut conversation = ConversationContext::new();

    println!("🌱 ESG 지식그래프 챗봇 (종료: exit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all("\n질문> ".as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&question) {
            break;
        }

        match services.ask(question, &mut conversation).await {
            Ok(answer) => {
                println!("{}", answer.answer().unwrap_or(NO_ANSWER_NOTICE));
                println!("\n🔍 생성된 Cypher:\n{}", answer.query);
            }
            Err(e) => println!("{}{:#}", ERROR_PREFIX, e),
        }
    }

    conversation.clear();
    Ok(())
}

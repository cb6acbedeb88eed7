#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    agent_courier::rocket().launch().await?;
    Ok(())
}

use bwt_emulator::{
    command::pad,
    error::Error,
    mock::{collect_received, MockDeviceBuilder},
};
use color_eyre::Result;
use pretty_assertions::assert_eq;

mod common;
use common::*;

#[tokio::test]
async fn payload_is_forwarded_padded() -> Result<()> {
    let emulator = start(
        single_session(fast_config()),
        MockDeviceBuilder::new("forward"),
    )
    .await?;
    let mut events = emulator.mock.events();
    let mut client = emulator.connect().await?;

    client.send(&[1, 2, 3, 4, 5]).await?;
    client.quit().await?;
    emulator.stopped().await?;

    assert_eq!(
        collect_received(&mut events),
        [1, 2, 3, 4, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    );

    Ok(())
}

#[tokio::test]
async fn device_answers_are_not_relayed() -> Result<()> {
    // Every probe byte in the payload makes the mock answer.
    let emulator = start(
        single_session(fast_config()),
        MockDeviceBuilder::new("chatty").acknowledge_after(1),
    )
    .await?;
    let mut client = emulator.connect().await?;

    client.send(b"ping").await?;
    client.send(b"quit").await?;

    assert!(client.read_to_end().await?.is_empty());

    emulator.stopped().await
}

#[tokio::test]
async fn commands_reach_device_in_order() -> Result<()> {
    let emulator = start(
        single_session(fast_config()),
        MockDeviceBuilder::new("order").acknowledge_after(1),
    )
    .await?;
    let mut events = emulator.mock.events();
    let mut client = emulator.connect().await?;

    client.send(b"alpha").await?;
    client.uninit().await?;
    assert!(client.init().await?);
    client.send(b"beta").await?;
    client.quit().await?;
    emulator.stopped().await?;

    let mut expected = pad(b"alpha")?;
    expected.extend(b"nbt");
    expected.extend(pad(b"beta")?);
    assert_eq!(collect_received(&mut events), expected);

    Ok(())
}

#[tokio::test]
async fn oversized_payload_is_refused() -> Result<()> {
    let emulator = start(fast_config(), MockDeviceBuilder::new("oversized")).await?;
    let mut client = emulator.connect().await?;

    let result = client.send(&[b'x'; 17]).await;

    assert!(matches!(result, Err(Error::FrameTooLong(17))));

    Ok(())
}

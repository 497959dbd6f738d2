//! SQS implementation of the queue client.

use std::collections::HashMap;

use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use futures_util::future::BoxFuture;
use url::Url;

use crate::error::Error;

use super::{check_size, QueueClient, ReceiveOptions, ReceivedMessage, SendReceipt};

/// Queue client backed by Amazon SQS or any SQS-compatible endpoint.
#[derive(Clone)]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    /// Creates a new SQS client wrapper with the provided client.
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Builds a client from shared AWS configuration.
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_sqs::Client::new(config))
    }
}

fn convert(queue: &Url, message: aws_sdk_sqs::types::Message) -> Option<ReceivedMessage> {
    let (Some(message_id), Some(receipt_handle)) = (message.message_id, message.receipt_handle)
    else {
        tracing::warn!(%queue, "Discarding message without id or receipt handle");
        return None;
    };

    let body = message.body.unwrap_or_default();

    if let Some(expected) = message.md5_of_body.as_deref() {
        let actual = hex::encode(md5::compute(&body).as_ref());
        if actual != expected {
            tracing::warn!(
                %queue,
                message.id = %message_id,
                %expected,
                %actual,
                "Message body checksum mismatch"
            );
        }
    }

    let receive_count = message
        .attributes
        .as_ref()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    let attributes = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.string_value.map(|s| (k, s)))
        .collect();

    Some(ReceivedMessage {
        message_id,
        receipt_handle,
        body,
        attributes,
        receive_count,
    })
}

impl QueueClient for SqsQueueClient {
    fn receive<'a>(
        &'a self,
        queue: &'a Url,
        options: ReceiveOptions,
    ) -> BoxFuture<'a, Result<Vec<ReceivedMessage>, Error>> {
        Box::pin(async move {
            let output = self
                .client
                .receive_message()
                .queue_url(queue.as_str())
                .max_number_of_messages(options.max_messages)
                .wait_time_seconds(options.wait_seconds)
                .visibility_timeout(options.visibility_timeout)
                .message_attribute_names("All")
                .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
                .send()
                .await
                .map_err(|e| Error::receive(queue, e))?;

            Ok(output
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|message| convert(queue, message))
                .collect())
        })
    }

    fn send<'a>(
        &'a self,
        queue: &'a Url,
        body: String,
        attributes: HashMap<String, String>,
    ) -> BoxFuture<'a, Result<SendReceipt, Error>> {
        Box::pin(async move {
            check_size(&body, &attributes)?;

            let mut request = self
                .client
                .send_message()
                .queue_url(queue.as_str())
                .message_body(body);

            for (k, v) in attributes {
                let value = MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(v)
                    .build()
                    .map_err(|e| Error::delivery(queue, e))?;
                request = request.message_attributes(k, value);
            }

            let output = request
                .send()
                .await
                .map_err(|e| Error::delivery(queue, e))?;

            let message_id = output
                .message_id
                .ok_or_else(|| Error::delivery(queue, eyre::eyre!("No message ID in response")))?;

            Ok(SendReceipt { message_id })
        })
    }

    fn delete<'a>(
        &'a self,
        queue: &'a Url,
        receipt_handle: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.client
                .delete_message()
                .queue_url(queue.as_str())
                .receipt_handle(receipt_handle)
                .send()
                .await
                .map_err(|e| Error::delete(queue, e))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Url {
        Url::parse("https://sqs.us-east-1.amazonaws.com/123456789012/work").unwrap()
    }

    #[test]
    fn test_convert_extracts_attributes() {
        let body = r#"{"jobId":"J1"}"#;
        let message = aws_sdk_sqs::types::Message::builder()
            .message_id("m-1")
            .receipt_handle("r-1")
            .body(body)
            .md5_of_body(hex::encode(md5::compute(body).as_ref()))
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
            .message_attributes(
                "jobId",
                MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("J1")
                    .build()
                    .unwrap(),
            )
            .build();

        let converted = convert(&queue(), message).unwrap();
        assert_eq!(converted.message_id, "m-1");
        assert_eq!(converted.receipt_handle, "r-1");
        assert_eq!(converted.body, body);
        assert_eq!(converted.receive_count, 3);
        assert_eq!(converted.attributes["jobId"], "J1");
    }

    #[test]
    fn test_convert_requires_receipt_handle() {
        let message = aws_sdk_sqs::types::Message::builder()
            .message_id("m-1")
            .body("{}")
            .build();

        assert!(convert(&queue(), message).is_none());
    }
}

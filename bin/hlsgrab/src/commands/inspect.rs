use clap::Parser;
use hlsgrab::m3u8::load_manifest;
use url::Url;

use super::ConfigOptions;

#[derive(Parser, Clone, Debug)]
#[clap(name = "inspect", short_flag = 'S')]
pub struct InspectCommand {
    #[clap(flatten)]
    pub options: ConfigOptions,

    /// Master playlist url
    pub url: Url,
}

impl InspectCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.options.load()?;
        let client = self.options.client(&config, Some(&self.url))?;

        let Some(manifest) = load_manifest(&client, &self.url).await? else {
            eprintln!("No rendition found in {}", self.url);
            return Ok(());
        };

        println!("Manifest: {}", manifest.base_url);
        if let Some(duration) = manifest.duration {
            println!("Duration: {duration:.3}s");
        }
        match &manifest.encryption {
            Some(encryption) => println!(
                "Encryption: AES-128 key={} iv={}",
                encryption.key_url,
                encryption.iv.as_deref().unwrap_or("<media sequence>")
            ),
            None => println!("Encryption: none"),
        }

        for (index, variant) in manifest.variants.iter().enumerate() {
            let bandwidth = variant
                .bandwidth
                .map(|b| format!("{:.0}kbps", b as f64 / 1000.))
                .unwrap_or_else(|| "-".to_string());
            let frame_rate = variant
                .frame_rate
                .map(|f| format!("{f}fps"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "[{index}] {} {bandwidth} {frame_rate} {}",
                variant.resolution, variant.url
            );
        }

        Ok(())
    }
}

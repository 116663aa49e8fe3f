use anyhow::Result;
use portfolio_workflow::config::CurrencyConfig;
use portfolio_workflow::CurrencyConverter;

pub struct ConvertCommand {
    pub amount: f64,
    pub from: String,
    pub to: String,
}

impl ConvertCommand {
    pub fn new(amount: f64, from: String, to: String) -> Self {
        Self { amount, from, to }
    }

    pub fn execute(&self, config: &CurrencyConfig) -> Result<()> {
        let converter = CurrencyConverter::from_config(config)?;
        let converted = converter.convert(self.amount, &self.from, &self.to)?;

        println!(
            "💱 {:.2} {} = {:.2} {}",
            self.amount,
            self.from.to_ascii_uppercase(),
            converted,
            self.to.to_ascii_uppercase()
        );
        println!(
            "   📈 Rates per 1 {}: {} {:.4}, {} {:.4}",
            converter.base(),
            self.from.to_ascii_uppercase(),
            converter.rate(&self.from)?,
            self.to.to_ascii_uppercase(),
            converter.rate(&self.to)?
        );
        Ok(())
    }
}
